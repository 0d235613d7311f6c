//! Handlers for image and mask uploads.

use axum::extract::{Multipart, State};
use axum::Json;
use relay_backend::api::{UploadFile, UploadKind, UploadRequest};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /upload/image
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    forward(state, UploadKind::Image, multipart).await
}

/// POST /upload/mask
///
/// Routed to the backend holding the image named by `original_ref` when
/// that is known.
pub async fn upload_mask(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    forward(state, UploadKind::Mask, multipart).await
}

async fn forward(state: AppState, kind: UploadKind, multipart: Multipart) -> AppResult<Json<Value>> {
    let request = read_upload(kind, multipart).await?;
    let response = state.router.upload(request).await?;
    Ok(Json(response))
}

/// Collect the first file part and every text field of a multipart body.
async fn read_upload(kind: UploadKind, mut multipart: Multipart) -> AppResult<UploadRequest> {
    let mut file = None;
    let mut fields = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                if file.is_some() {
                    tracing::debug!(field = %name, "Ignoring extra file part");
                    continue;
                }
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
                file = Some(UploadFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read field: {e}")))?;
                fields.push((name, value));
            }
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("No file received".into()))?;
    Ok(UploadRequest { kind, file, fields })
}
