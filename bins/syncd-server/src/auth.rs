// SPDX-License-Identifier: Apache-2.0
//! Request-path credential resolution via the `X-API-Key` header.

use crate::error::ApiError;
use crate::state::AppState;
use axum::http::HeaderMap;
use syncd_auth::{authenticate, Identity, Permission};
use syncd_core::AppError;

/// Resolve the caller's [`Identity`] from the `X-API-Key` header.
pub async fn authenticate_request(headers: &HeaderMap, state: &AppState) -> Result<Identity, ApiError> {
    let token = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let identity = authenticate(token, &state.admin_api_key, state.lookup.as_ref()).await?;
    Ok(identity)
}

/// Fail with `Forbidden` unless `identity` carries `perm`.
pub fn require_permission(identity: &Identity, perm: Permission) -> Result<(), ApiError> {
    if identity.permissions.has(perm) {
        Ok(())
    } else {
        Err(ApiError(AppError::Forbidden))
    }
}
