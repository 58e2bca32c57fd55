// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy: a stable set of kinds mapped to transport framings.

use thiserror::Error;

/// Stable, transport-independent error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Path grammar, size, or payload shape failed validation.
    ValidationError,
    /// Credential absent or unresolvable.
    Unauthorized,
    /// Authenticated but lacking the required permission.
    Forbidden,
    /// Target resource does not exist (or is tombstoned).
    NotFound,
    /// A strict-create collided with an existing active record.
    Conflict,
    /// Unexpected internal failure.
    InternalError,
}

impl ErrorCode {
    /// HTTP status code for the request/response transport.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::InternalError => 500,
        }
    }
}

/// A single terminal error type that every handler converges on before
/// being translated into a transport-specific framing (HTTP body or
/// channel ack envelope).
#[derive(Debug, Error)]
pub enum AppError {
    /// See [`ErrorCode::ValidationError`].
    #[error("validation error: {0}")]
    Validation(String),
    /// See [`ErrorCode::Unauthorized`].
    #[error("unauthorized")]
    Unauthorized,
    /// See [`ErrorCode::Forbidden`].
    #[error("forbidden")]
    Forbidden,
    /// See [`ErrorCode::NotFound`].
    #[error("not found")]
    NotFound,
    /// See [`ErrorCode::Conflict`].
    #[error("conflict")]
    Conflict,
    /// Catch-all for failures that should never reach a client unexplained.
    #[error("internal error: {0}")]
    Internal(String),
    /// Lower-layer store failure, always surfaced as `InternalError`.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    /// Payload could not be parsed, always surfaced as `ValidationError`
    /// by callers that construct this from request bodies.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AppError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::Serde(_) => ErrorCode::ValidationError,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::NotFound => ErrorCode::NotFound,
            Self::Conflict => ErrorCode::Conflict,
            Self::Internal(_) | Self::Store(_) => ErrorCode::InternalError,
        }
    }

    /// Caller-facing message. Internal failures get a generic message;
    /// the causal chain is only ever logged, never returned to a client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self.code() {
            ErrorCode::InternalError => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<syncd_auth::AuthError> for AppError {
    fn from(err: syncd_auth::AuthError) -> Self {
        match err {
            syncd_auth::AuthError::Unauthorized => Self::Unauthorized,
            syncd_auth::AuthError::InvalidKey => Self::Unauthorized,
        }
    }
}
