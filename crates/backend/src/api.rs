//! REST API client for the backend worker HTTP endpoints.
//!
//! Wraps job submission, job history, artifact download and file upload
//! using [`reqwest`]. One [`BackendApi`] is shared across the whole pool;
//! every call names the [`BackendEndpoint`] it targets.

use std::time::Duration;

use relay_core::endpoint::BackendEndpoint;
use reqwest::multipart::{Form, Part};

/// Default timeout for submit, history and upload calls.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the backend pool.
#[derive(Clone)]
pub struct BackendApi {
    client: reqwest::Client,
    timeout: Duration,
}

/// Errors from the backend REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request to backend failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The upload cannot be encoded for the backend (e.g. a malformed
    /// content type supplied by the client).
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// The response parsed but lacks a field the proxy depends on.
    #[error("Backend response is missing '{0}'")]
    MissingField(&'static str),
}

/// Which upload endpoint a file is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Mask,
}

impl UploadKind {
    fn path(self) -> &'static str {
        match self {
            UploadKind::Image => "upload/image",
            UploadKind::Mask => "upload/mask",
        }
    }
}

/// A file to forward to a backend's upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A complete upload: the file plus any plain form fields (`overwrite`,
/// `subfolder`, `type`, `original_ref`, ...), forwarded verbatim.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub kind: UploadKind,
    pub file: UploadFile,
    pub fields: Vec<(String, String)>,
}

impl BackendApi {
    /// Create a client with the given per-call timeout.
    ///
    /// `accept_invalid_certs` disables TLS certificate verification for
    /// backends that serve self-signed certificates.
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Result<Self, BackendApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling across
    /// callers, or a preconfigured client in tests).
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward a job submission as-is via `POST /prompt`.
    ///
    /// Returns the backend's acceptance payload. The payload is not
    /// inspected here; callers extract the job id.
    pub async fn submit_prompt(
        &self,
        endpoint: &BackendEndpoint,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, BackendApiError> {
        let response = self
            .client
            .post(format!("{}/prompt", endpoint.http_url()))
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a job via `GET /history/{job_id}`.
    pub async fn get_history(
        &self,
        endpoint: &BackendEndpoint,
        job_id: &str,
    ) -> Result<serde_json::Value, BackendApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", endpoint.http_url(), job_id))
            .timeout(self.timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Open an artifact download via `GET /view?{query}`.
    ///
    /// The query string is forwarded unchanged. Returns the response with
    /// its body still unread so callers can stream it; no overall timeout
    /// is applied to the body.
    pub async fn view(
        &self,
        endpoint: &BackendEndpoint,
        query: Option<&str>,
    ) -> Result<reqwest::Response, BackendApiError> {
        let url = match query {
            Some(q) if !q.is_empty() => format!("{}/view?{q}", endpoint.http_url()),
            _ => format!("{}/view", endpoint.http_url()),
        };

        let response = self.client.get(url).send().await?;
        Self::ensure_success(response).await
    }

    /// Forward a multipart upload. The file is sent as the `image` part.
    pub async fn upload(
        &self,
        endpoint: &BackendEndpoint,
        request: UploadRequest,
    ) -> Result<serde_json::Value, BackendApiError> {
        let UploadRequest { kind, file, fields } = request;

        let mut part = Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(content_type) = file.content_type.as_deref() {
            part = part.mime_str(content_type).map_err(|_| {
                BackendApiError::InvalidUpload(format!("invalid content type '{content_type}'"))
            })?;
        }

        let mut form = Form::new().part("image", part);
        for (name, value) in fields {
            form = form.text(name, value);
        }

        let response = self
            .client
            .post(format!("{}/{}", endpoint.http_url(), kind.path()))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`BackendApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
