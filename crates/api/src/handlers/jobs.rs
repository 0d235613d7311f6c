//! Handlers for job submission and job status.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use crate::error::AppResult;
use crate::state::AppState;

/// POST /prompt
///
/// Forward a workflow to a backend (by input-artifact affinity when known)
/// and relay the backend's answer. The returned `prompt_id` is remembered
/// so status lookups reach the same backend.
pub async fn submit_prompt(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    let response = state.router.submit_job(&payload).await?;
    Ok(Json(response))
}

/// GET /history/{prompt_id}
///
/// Relay the job's history from the backend that accepted it. Unknown or
/// expired job IDs are 404 without touching any backend.
pub async fn get_history(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> AppResult<Json<Value>> {
    let history = state.router.job_status(&prompt_id).await?;
    Ok(Json(history))
}
