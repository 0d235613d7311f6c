use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_backend::api::BackendApiError;
use relay_backend::routing::RoutingError;
use relay_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`RoutingError`] and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `relay_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Routing to, or talking to, a backend failed.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", core.to_string()),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Routing errors ---
            AppError::Routing(err) => classify_routing_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a routing error into an HTTP status, error code, and message.
///
/// - Unknown affinity or exhausted polling maps to 404.
/// - A backend's own non-2xx answer keeps its status.
/// - An upload that cannot be encoded is the client's fault (400).
/// - Transport failures and unusable responses map to 500 and carry the
///   underlying message, so callers can tell which backend call failed.
fn classify_routing_error(err: &RoutingError) -> (StatusCode, &'static str, String) {
    match err {
        RoutingError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        RoutingError::Backend(BackendApiError::ApiError { status, body }) => {
            tracing::warn!(status, body = %body, "Backend rejected request");
            (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "BACKEND_ERROR",
                body.clone(),
            )
        }
        RoutingError::Backend(BackendApiError::Request(e)) => {
            tracing::error!(error = %e, "Backend request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "BACKEND_UNAVAILABLE",
                e.to_string(),
            )
        }
        RoutingError::Backend(invalid @ BackendApiError::InvalidUpload(_)) => {
            (StatusCode::BAD_REQUEST, "BAD_REQUEST", invalid.to_string())
        }
        RoutingError::Backend(missing @ BackendApiError::MissingField(_)) => {
            tracing::error!(error = %missing, "Unusable backend response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INVALID_BACKEND_RESPONSE",
                missing.to_string(),
            )
        }
    }
}
