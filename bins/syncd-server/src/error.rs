// SPDX-License-Identifier: Apache-2.0
//! HTTP framing for [`AppError`] on the request-transport path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use syncd_core::AppError;

/// Wraps an [`AppError`] so it can be returned directly from an axum
/// handler via `?`. The single terminal converter for the request path,
/// mirrored by [`syncd_proto::AckEnvelope::err`] on the channel path.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<syncd_auth::AuthError> for ApiError {
    fn from(err: syncd_auth::AuthError) -> Self {
        Self(AppError::from(err))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: syncd_core::ErrorCode,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let message = self.0.client_message();
        if matches!(code, syncd_core::ErrorCode::InternalError) {
            tracing::error!(err = %self.0, "internal error");
        } else {
            tracing::warn!(err = %self.0, "request failed");
        }
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: ErrorDetail { code, message: &message } })).into_response()
    }
}
