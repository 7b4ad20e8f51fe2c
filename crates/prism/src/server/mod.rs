//! HTTP API server.
//!
//! Exposes batch submission, progress streams, archives, and cache
//! administration over axum. Authentication is left to whatever sits in
//! front of the server; it forwards the caller's identity in the
//! `x-prism-owner` header.

mod error;
mod routes;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use prism_core::Prism;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub prism: Arc<Prism>,
}

impl AppState {
    pub fn new(prism: Arc<Prism>) -> Self {
        Self { prism }
    }
}

/// Full router with middleware.
pub fn router(state: AppState) -> Router {
    let body_limit = state.prism.config().server.body_limit_mb * 1024 * 1024;
    routes::create_router()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C, then stop dispatching work.
pub async fn run(prism: Arc<Prism>, bind: &str) -> anyhow::Result<()> {
    let state = AppState::new(Arc::clone(&prism));
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("API server shutting down...");
        })
        .await?;

    prism.coordinator().shutdown();
    Ok(())
}
