use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Number of backends in the pool.
    pub backends: usize,
    /// Live (not yet swept) affinity entries.
    pub affinity_entries: usize,
    /// Open WebSocket fan-out sessions.
    pub sessions: usize,
}

/// GET /health -- process liveness plus routing table size.
///
/// Backends are not probed; selection has no health signal either.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backends: state.router.pool().len(),
        affinity_entries: state.router.cache().len().await,
        sessions: state.sessions.session_count().await,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
