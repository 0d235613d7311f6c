//! Handler for artifact downloads.

use axum::body::Body;
use axum::extract::{Query, RawQuery, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Query parameters for `GET /view`.
///
/// Only `filename` drives routing; `type`, `subfolder` and anything else
/// are forwarded to the backend untouched.
#[derive(Debug, Deserialize)]
pub struct ViewParams {
    pub filename: String,
}

/// GET /view?filename=...
///
/// Stream an artifact from the backend that produced or stored it. The
/// completion event that names the artifact may still be in flight, so the
/// router polls for its affinity before giving up with 404.
pub async fn view_artifact(
    State(state): State<AppState>,
    Query(params): Query<ViewParams>,
    RawQuery(query): RawQuery,
) -> AppResult<Response> {
    if params.filename.trim().is_empty() {
        return Err(AppError::BadRequest("filename must not be empty".into()));
    }

    let artifact = state
        .router
        .fetch_artifact(&params.filename, query.as_deref())
        .await?;

    let mut builder = Response::builder().status(StatusCode::OK);
    for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_DISPOSITION, CACHE_CONTROL] {
        if let Some(value) = artifact.response.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    builder
        .body(Body::from_stream(artifact.response.bytes_stream()))
        .map_err(|e| AppError::InternalError(format!("Failed to build artifact response: {e}")))
}
