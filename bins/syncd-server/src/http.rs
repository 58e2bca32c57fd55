// SPDX-License-Identifier: Apache-2.0
//! Request/response gateway: the REST endpoints of the file sync API.

use crate::auth::{authenticate_request, require_permission};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use syncd_auth::Permission;
use syncd_core::store::ListOptions;
use syncd_core::validate::{validate_content_size, validate_path};
use syncd_core::{AppError, FileDetail, FileStore, FileSummary};
use syncd_proto::OutboundEvent;
use tracing::warn;

/// Build the HTTP router. `started_at` is used by `/health` to report
/// uptime.
pub fn router(state: AppState, started_at: Instant) -> Router {
    Router::new()
        .route(
            "/health",
            get(move |State(state): State<AppState>| health(state, started_at)),
        )
        .route(
            "/files",
            get(get_files).post(create_file).put(upsert_file).patch(rename_file).delete(delete_file),
        )
        .route("/files/all", delete(delete_all_files))
        .with_state(state)
}

/// Query parameters shared by every `/files` method: single-file GET,
/// listing GET, and path-scoped DELETE.
#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    path: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    include_deleted: Option<bool>,
    extension: Option<String>,
    content_contains: Option<String>,
    path_contains: Option<String>,
    is_binary: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CreateOrUpsertBody {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    path: String,
    #[serde(rename = "newPath")]
    new_path: String,
}

#[derive(Debug, Serialize)]
struct ListingResponse {
    files: Vec<FileSummary>,
    total: i64,
    limit: i64,
    offset: i64,
}

#[derive(Debug, Serialize)]
struct DeletedAllResponse {
    deleted: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Milliseconds since process start, matching this binary's other
    /// duration fields.
    uptime: u128,
    database: &'static str,
}

async fn health(state: AppState, started_at: Instant) -> impl IntoResponse {
    let healthy = state.store.ping().await;
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: started_at.elapsed().as_millis(),
        database: if healthy { "connected" } else { "disconnected" },
    };
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

async fn get_files(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<FilesQuery>,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Read)?;

    if let Some(path) = &query.path {
        if query.limit.is_none() && query.offset.is_none() {
            validate_path(path).map_err(ApiError::from)?;
            let record = state
                .store
                .get(identity.tenant_id, path)
                .await?
                .ok_or_else(|| ApiError::from(AppError::NotFound))?;
            return Ok(Json(FileDetail::from(&record)).into_response());
        }
    }

    let store = state.store.clone();
    tokio::spawn(async move {
        if let Err(err) = store.cleanup_expired().await {
            warn!(?err, "best-effort tombstone cleanup failed");
        }
    });

    let extensions = query
        .extension
        .map(|e| e.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let options = ListOptions {
        path_prefix: query.path,
        path_contains: query.path_contains,
        extensions,
        content_contains: query.content_contains,
        is_binary: query.is_binary,
        include_deleted: query.include_deleted.unwrap_or(false),
        limit: query.limit.unwrap_or(ListOptions::DEFAULT_LIMIT),
        offset: query.offset.unwrap_or(0),
    };
    let page = state.store.list(identity.tenant_id, options).await?;
    let files = page.files.iter().map(FileSummary::from).collect();
    Ok(Json(ListingResponse { files, total: page.total, limit: page.limit, offset: page.offset })
        .into_response())
}

async fn create_file(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateOrUpsertBody>,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Write)?;
    validate_path(&body.path).map_err(ApiError::from)?;
    validate_content_size(&body.content).map_err(ApiError::from)?;

    let record = state.store.create_strict(identity.tenant_id, &body.path, &body.content).await?;
    state.registry.broadcast_all(identity.tenant_id, &OutboundEvent::created(&record)).await;
    Ok((StatusCode::CREATED, Json(FileSummary::from(&record))).into_response())
}

async fn upsert_file(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateOrUpsertBody>,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Write)?;
    validate_path(&body.path).map_err(ApiError::from)?;
    validate_content_size(&body.content).map_err(ApiError::from)?;

    let outcome = state.store.upsert(identity.tenant_id, &body.path, &body.content).await?;
    let event = if outcome.created {
        OutboundEvent::created(&outcome.record)
    } else {
        OutboundEvent::modified(&outcome.record)
    };
    state.registry.broadcast_all(identity.tenant_id, &event).await;
    Ok(Json(FileSummary::from(&outcome.record)).into_response())
}

async fn rename_file(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<RenameBody>,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Write)?;
    validate_path(&body.path).map_err(ApiError::from)?;
    validate_path(&body.new_path).map_err(ApiError::from)?;

    let outcome = state.store.rename(identity.tenant_id, &body.path, &body.new_path).await?;
    let event = if outcome.created {
        OutboundEvent::created(&outcome.record)
    } else {
        OutboundEvent::renamed(&body.path, &outcome.record)
    };
    state.registry.broadcast_all(identity.tenant_id, &event).await;
    Ok(Json(FileSummary::from(&outcome.record)).into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<FilesQuery>,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Write)?;
    let path = query.path.ok_or_else(|| {
        ApiError::from(AppError::Validation("path query parameter is required".to_string()))
    })?;
    validate_path(&path).map_err(ApiError::from)?;

    let affected = state.store.soft_delete(identity.tenant_id, &path).await?;
    if affected {
        if let Some(record) = state.store.get_including_tombstones(identity.tenant_id, &path).await? {
            let deleted_at = record.updated_at;
            state
                .registry
                .broadcast_all(identity.tenant_id, &OutboundEvent::deleted(&path, deleted_at))
                .await;
        }
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_all_files(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    let identity = authenticate_request(&headers, &state).await?;
    require_permission(&identity, Permission::Write)?;
    let deleted = state.store.soft_delete_all(identity.tenant_id).await?;
    Ok(Json(DeletedAllResponse { deleted }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_state, ADMIN_HEADER, TENANT_HEADER};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());

        let create = Request::builder()
            .method("POST")
            .uri("/files")
            .header("x-api-key", TENANT_HEADER)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"notes/a.md","content":"hello"}"#))
            .unwrap();
        let res = app.clone().oneshot(create).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let get = Request::builder()
            .uri("/files?path=notes/a.md")
            .header("x-api-key", TENANT_HEADER)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(get).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["content"], "hello");
        assert_eq!(json["path"], "notes/a.md");
    }

    #[tokio::test]
    async fn strict_create_conflicts_on_second_call() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());

        let body = r#"{"path":"a.txt","content":"x"}"#;
        let make_req = || {
            Request::builder()
                .method("POST")
                .uri("/files")
                .header("x-api-key", TENANT_HEADER)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };
        let first = app.clone().oneshot(make_req()).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = app.oneshot(make_req()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());
        let req = Request::builder()
            .uri("/files?path=missing.txt")
            .header("x-api-key", TENANT_HEADER)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_credential_is_401() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());
        let req = Request::builder().uri("/files?path=a.txt").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn read_only_credential_cannot_write() {
        use crate::testutil::READONLY_HEADER;
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());
        let req = Request::builder()
            .method("POST")
            .uri("/files")
            .header("x-api-key", READONLY_HEADER)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"a.txt","content":"x"}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_all_reports_count_and_no_content_scope_leak() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());

        for path in ["a.txt", "b.txt"] {
            let req = Request::builder()
                .method("PUT")
                .uri("/files")
                .header("x-api-key", TENANT_HEADER)
                .header("content-type", "application/json")
                .body(Body::from(format!(r#"{{"path":"{path}","content":"x"}}"#)))
                .unwrap();
            app.clone().oneshot(req).await.unwrap();
        }

        let req = Request::builder()
            .method("DELETE")
            .uri("/files/all")
            .header("x-api-key", TENANT_HEADER)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let json = body_json(res).await;
        assert_eq!(json["deleted"], 2);
    }

    #[tokio::test]
    async fn health_reports_healthy_for_live_store() {
        let (state, _tenant_id) = test_state().await;
        let app = router(state, Instant::now());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["status"], "healthy");
    }

    #[allow(dead_code)]
    const _ADMIN_HEADER_USED: &str = ADMIN_HEADER;
}
