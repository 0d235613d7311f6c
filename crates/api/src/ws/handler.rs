use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::session::run_session;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// A missing `clientId` is still upgraded so the rejection can be reported
/// with a close code the client understands.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        run_session(socket, params.client_id, state).await;
    })
}
