pub mod artifacts;
pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the proxy route tree.
///
/// The paths mirror the backends' own API so existing clients can point
/// at the proxy unchanged:
///
/// ```text
/// /ws?clientId=...          WebSocket fan-out
///
/// /prompt                   submit job (POST)
/// /history/{prompt_id}      job status (GET)
///
/// /view?filename=...        artifact download (GET)
/// /upload/image             image upload (POST, multipart)
/// /upload/mask              mask upload (POST, multipart)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(jobs::router())
        .merge(artifacts::router())
}
