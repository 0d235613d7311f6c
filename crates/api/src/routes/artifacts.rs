//! Route definitions for artifact downloads and uploads.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{artifacts, uploads};
use crate::state::AppState;

/// Largest accepted upload body (64 MiB).
pub const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// ```text
/// GET    /view             -> view_artifact
/// POST   /upload/image     -> upload_image
/// POST   /upload/mask      -> upload_mask
/// ```
pub fn router() -> Router<AppState> {
    let uploads = Router::new()
        .route("/upload/image", post(uploads::upload_image))
        .route("/upload/mask", post(uploads::upload_mask))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    Router::new()
        .route("/view", get(artifacts::view_artifact))
        .merge(uploads)
}
