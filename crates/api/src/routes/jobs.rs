//! Route definitions for job submission and status.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// ```text
/// POST   /prompt                 -> submit_prompt
/// GET    /history/{prompt_id}    -> get_history
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prompt", post(jobs::submit_prompt))
        .route("/history/{prompt_id}", get(jobs::get_history))
}
