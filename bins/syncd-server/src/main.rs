// SPDX-License-Identifier: Apache-2.0
//! Tenant-scoped real-time file sync server: HTTP + WebSocket gateway over
//! a Postgres-backed file store.

mod auth;
mod error;
mod http;
mod state;
mod testutil;
mod ws;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use state::AppState;
use std::sync::Arc;
use std::time::Instant;
use syncd_auth::CredentialLookup;
use syncd_core::{FileStore, PgFileStore};
use syncd_gateway::RoomRegistry;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = syncd_config::Config::from_env().context("load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pg_store = PgFileStore::connect(
        &config.database_url,
        config.pool.max_connections,
        config.pool.idle_timeout,
        config.pool.acquire_timeout,
    )
    .await
    .context("connect to database")?;

    // `PgFileStore` wraps a `PgPool`, cheap to clone, and implements both
    // seams the rest of the binary depends on; each `Arc<dyn _>` below is a
    // distinct facet of the same pool-backed value.
    let store: Arc<dyn FileStore> = Arc::new(pg_store.clone());
    let lookup: Arc<dyn CredentialLookup> = Arc::new(pg_store);

    let state = AppState {
        store,
        lookup,
        registry: Arc::new(RoomRegistry::new()),
        admin_api_key: config.admin_api_key.clone(),
    };

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let ws_router = Router::new().route("/ws", get(ws::ws_handler)).with_state(state.clone());

    let app = http::router(state, Instant::now())
        .merge(ws_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from((config.host, config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind http listener")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("serve http")?;

    Ok(())
}
