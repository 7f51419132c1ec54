//! API server wiring for Shoal
//!
//! Builds the axum router over a running [`ShoalEngine`] and serves it
//! until the process receives an interrupt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use shoal_core::ShoalEngine;
use tower_http::cors::CorsLayer;

use crate::handlers::{
    delete_video, get_video, get_video_locator, get_video_stats, health, list_videos, seed_video,
    stop_video, swarm_stats, upload_video,
};

/// Shared state available to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Engine facade the handlers drive
    pub engine: Arc<ShoalEngine>,
    /// When the server came up, for the health endpoint
    pub started_at: Instant,
}

/// Builds the JSON API router with CORS and upload limits applied.
pub fn build_router(state: AppState) -> Router {
    // Leave multipart framing headroom above the configured content cap
    let body_limit = state.engine.config().ingest.max_upload_bytes as usize + 1024 * 1024;

    Router::new()
        .route("/api/videos/upload", post(upload_video))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/stats", get(swarm_stats))
        .route("/api/videos/{id}", get(get_video).delete(delete_video))
        .route("/api/videos/{id}/locator", get(get_video_locator))
        .route("/api/videos/{id}/stats", get(get_video_stats))
        .route("/api/videos/{id}/seed", post(seed_video))
        .route("/api/videos/{id}/stop", post(stop_video))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until interrupted, then winds the engine down.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn run_server(
    engine: Arc<ShoalEngine>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState {
        engine: Arc::clone(&engine),
        started_at: Instant::now(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Shoal API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, winding down sessions");
    engine.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to install shutdown handler: {e}");
    }
}
