//! Affinity-aware request routing across the backend pool.
//!
//! [`BackendRouter`] decides which backend serves each HTTP request. Job
//! submissions go to the backend that already holds their input image
//! (when known) or to a random one; status and artifact requests go to
//! the backend recorded in the [`AffinityCache`]. Responses are mined for
//! new affinity facts on the way back.

use std::sync::Arc;

use relay_core::affinity::AffinityCache;
use relay_core::endpoint::BackendEndpoint;
use relay_core::pool::BackendPool;
use relay_core::search::{
    find_string, INPUT_ARTIFACT_KEY, JOB_ID_KEY, OUTPUT_ARTIFACT_KEY, UPLOAD_NAME_KEY,
};

use crate::api::{BackendApi, BackendApiError, UploadKind, UploadRequest};
use crate::retry::RetryPolicy;

/// Form field on mask uploads that references the image being masked.
const ORIGINAL_REF_FIELD: &str = "original_ref";

/// Routes requests to backends and maintains the affinity cache.
///
/// Created once at startup; the returned `Arc` is cloned into handlers.
pub struct BackendRouter {
    pool: Arc<BackendPool>,
    cache: Arc<AffinityCache>,
    api: BackendApi,
    artifact_fetch: RetryPolicy,
}

/// Result of a successful artifact lookup: the open response plus the
/// endpoint that served it.
#[derive(Debug)]
pub struct ArtifactResponse {
    pub endpoint: BackendEndpoint,
    pub response: reqwest::Response,
}

/// Errors surfaced by [`BackendRouter`].
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// No affinity is known for this identifier, or the retry budget ran out.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Talking to the chosen backend failed.
    #[error(transparent)]
    Backend(#[from] BackendApiError),
}

impl BackendRouter {
    pub fn new(
        pool: Arc<BackendPool>,
        cache: Arc<AffinityCache>,
        api: BackendApi,
        artifact_fetch: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            cache,
            api,
            artifact_fetch,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<AffinityCache> {
        &self.cache
    }

    /// Choose the backend for a job submission.
    ///
    /// Follows the affinity of the payload's input image when one is
    /// recorded, otherwise picks at random.
    pub async fn endpoint_for_submission(&self, payload: &serde_json::Value) -> BackendEndpoint {
        if let Some(image) = find_string(payload, INPUT_ARTIFACT_KEY) {
            if let Some(endpoint) = self.cache.get(image).await {
                tracing::debug!(image = %image, endpoint = %endpoint, "Input image has affinity");
                return endpoint;
            }
        }
        self.pool.pick_arbitrary().clone()
    }

    /// Forward a job submission and remember which backend accepted it.
    ///
    /// Fails without retrying if the backend is unreachable, times out, or
    /// returns no job id.
    pub async fn submit_job(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RoutingError> {
        let endpoint = self.endpoint_for_submission(payload).await;

        let response = self.api.submit_prompt(&endpoint, payload).await?;
        let job_id = find_string(&response, JOB_ID_KEY)
            .ok_or(BackendApiError::MissingField(JOB_ID_KEY))?;

        self.cache.put(job_id, endpoint.clone()).await;
        tracing::info!(job_id = %job_id, endpoint = %endpoint, "Job submitted");

        Ok(response)
    }

    /// Fetch a job's status from the backend that accepted it.
    ///
    /// A job with no recorded affinity is `NotFound` and no backend is
    /// contacted. An output filename in the response is recorded against
    /// the same backend.
    pub async fn job_status(&self, job_id: &str) -> Result<serde_json::Value, RoutingError> {
        let endpoint = self
            .cache
            .get(job_id)
            .await
            .ok_or_else(|| RoutingError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })?;

        let history = self.api.get_history(&endpoint, job_id).await?;

        if let Some(artifact) = find_string(&history, OUTPUT_ARTIFACT_KEY) {
            self.cache.put(artifact, endpoint.clone()).await;
            tracing::debug!(job_id = %job_id, artifact = %artifact, "Recorded artifact from history");
        }

        Ok(history)
    }

    /// Open a download for `artifact` on the backend that produced it.
    ///
    /// The affinity entry may still be in flight on a WebSocket session,
    /// so this polls. A cache miss and a failed fetch each consume one
    /// attempt of the same budget; running out is `NotFound`.
    pub async fn fetch_artifact(
        &self,
        artifact: &str,
        query: Option<&str>,
    ) -> Result<ArtifactResponse, RoutingError> {
        let attempts = self.artifact_fetch.attempts();

        for attempt in 1..=attempts {
            match self.cache.get(artifact).await {
                Some(endpoint) => match self.api.view(&endpoint, query).await {
                    Ok(response) => {
                        tracing::debug!(
                            artifact = %artifact,
                            endpoint = %endpoint,
                            attempt,
                            "Artifact located",
                        );
                        return Ok(ArtifactResponse { endpoint, response });
                    }
                    Err(e) => {
                        tracing::warn!(
                            artifact = %artifact,
                            endpoint = %endpoint,
                            error = %e,
                            "Artifact fetch attempt {attempt}/{attempts} failed",
                        );
                    }
                },
                None => {
                    tracing::debug!(
                        artifact = %artifact,
                        "No affinity yet, attempt {attempt}/{attempts}",
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.artifact_fetch.delay).await;
            }
        }

        Err(RoutingError::NotFound {
            entity: "Artifact",
            id: artifact.to_string(),
        })
    }

    /// Forward an upload and remember which backend stored the file.
    ///
    /// Masks follow the affinity of the image named in their
    /// `original_ref` field; everything else goes to a random backend.
    pub async fn upload(&self, request: UploadRequest) -> Result<serde_json::Value, RoutingError> {
        let endpoint = self.endpoint_for_upload(&request).await;

        let response = self.api.upload(&endpoint, request).await?;

        match find_string(&response, UPLOAD_NAME_KEY) {
            Some(name) => {
                self.cache.put(name, endpoint.clone()).await;
                tracing::info!(name = %name, endpoint = %endpoint, "Upload stored");
            }
            None => {
                tracing::warn!(endpoint = %endpoint, "Upload response has no file name");
            }
        }

        Ok(response)
    }

    async fn endpoint_for_upload(&self, request: &UploadRequest) -> BackendEndpoint {
        if request.kind == UploadKind::Mask {
            let original = request
                .fields
                .iter()
                .find(|(name, _)| name == ORIGINAL_REF_FIELD)
                .and_then(|(_, value)| serde_json::from_str::<serde_json::Value>(value).ok());

            if let Some(original) = original {
                if let Some(filename) = find_string(&original, OUTPUT_ARTIFACT_KEY) {
                    if let Some(endpoint) = self.cache.get(filename).await {
                        return endpoint;
                    }
                }
            }
        }
        self.pool.pick_arbitrary().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::api::UploadFile;

    /// Fake backend that counts calls and tags responses with its port.
    async fn fake_backend(calls: Arc<AtomicUsize>) -> BackendEndpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new()
            .route(
                "/prompt",
                post(move |State(calls): State<Arc<AtomicUsize>>| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"prompt_id": format!("job-{port}-{n}"), "number": n}))
                }),
            )
            .route(
                "/history/{id}",
                get(move |State(calls): State<Arc<AtomicUsize>>, Path(id): Path<String>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({id: {"outputs": {"9": {"images": [{"filename": format!("{port}.png")}]}}}}))
                }),
            )
            .route(
                "/upload/{kind}",
                post(move |State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"name": format!("upload-{port}.png"), "subfolder": "", "type": "input"}))
                }),
            )
            .with_state(calls);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}").parse().unwrap()
    }

    async fn router_with(endpoints: Vec<BackendEndpoint>, fetch: RetryPolicy) -> BackendRouter {
        BackendRouter::new(
            Arc::new(BackendPool::new(endpoints).unwrap()),
            Arc::new(AffinityCache::default()),
            BackendApi::new(Duration::from_secs(5), false).unwrap(),
            fetch,
        )
    }

    #[tokio::test]
    async fn submit_records_job_affinity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = fake_backend(Arc::clone(&calls)).await;
        let router = router_with(vec![endpoint.clone()], RetryPolicy::artifact_fetch()).await;

        let response = router
            .submit_job(&json!({"inputs": {"image": "cat.png"}}))
            .await
            .unwrap();

        let job_id = response["prompt_id"].as_str().unwrap();
        assert_eq!(router.cache().get(job_id).await, Some(endpoint));
    }

    #[tokio::test]
    async fn submit_follows_input_image_affinity() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let a = fake_backend(Arc::clone(&calls_a)).await;
        let b = fake_backend(Arc::clone(&calls_b)).await;
        let router = router_with(vec![a, b.clone()], RetryPolicy::artifact_fetch()).await;

        router.cache().put("cat.png", b.clone()).await;
        for _ in 0..10 {
            router
                .submit_job(&json!({"prompt": {"1": {"inputs": {"image": "cat.png"}}}}))
                .await
                .unwrap();
        }

        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn submit_without_job_id_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().route("/prompt", post(|| async { Json(json!({"error": "nope"})) }));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        let endpoint: BackendEndpoint = format!("http://127.0.0.1:{port}").parse().unwrap();
        let router = router_with(vec![endpoint], RetryPolicy::artifact_fetch()).await;

        let err = router.submit_job(&json!({})).await.unwrap_err();
        assert_matches!(
            err,
            RoutingError::Backend(BackendApiError::MissingField("prompt_id"))
        );
        assert!(router.cache().is_empty().await);
    }

    #[tokio::test]
    async fn unknown_job_status_makes_no_backend_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = fake_backend(Arc::clone(&calls)).await;
        let router = router_with(vec![endpoint], RetryPolicy::artifact_fetch()).await;

        let err = router.job_status("unknownid").await.unwrap_err();

        assert_matches!(err, RoutingError::NotFound { entity: "Job", ref id } if id == "unknownid");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn job_status_records_output_artifact() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = fake_backend(Arc::clone(&calls)).await;
        let router = router_with(vec![endpoint.clone()], RetryPolicy::artifact_fetch()).await;
        router.cache().put("j1", endpoint.clone()).await;

        let history = router.job_status("j1").await.unwrap();

        assert!(history["j1"]["outputs"].is_object());
        let artifact = format!("{}.png", endpoint.port());
        assert_eq!(router.cache().get(&artifact).await, Some(endpoint));
    }

    #[tokio::test(start_paused = true)]
    async fn artifact_fetch_gives_up_after_budget() {
        let endpoint: BackendEndpoint = "http://127.0.0.1:1".parse().unwrap();
        let router = router_with(vec![endpoint], RetryPolicy::artifact_fetch()).await;

        let started = tokio::time::Instant::now();
        let err = router.fetch_artifact("never.png", None).await.unwrap_err();

        assert_matches!(err, RoutingError::NotFound { entity: "Artifact", .. });
        // 15 attempts means 14 pauses and no trailing wait.
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    /// Fake backend whose `/view` fails with 500 `failures` times, then serves.
    async fn flaky_view_backend(calls: Arc<AtomicUsize>, failures: usize) -> BackendEndpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new()
            .route(
                "/view",
                get(move |State(calls): State<Arc<AtomicUsize>>| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        (StatusCode::INTERNAL_SERVER_ERROR, "warming up").into_response()
                    } else {
                        "pixels".into_response()
                    }
                }),
            )
            .with_state(calls);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn failed_fetches_share_the_attempt_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = flaky_view_backend(Arc::clone(&calls), 2).await;
        let router = router_with(
            vec![endpoint.clone()],
            RetryPolicy::new(15, Duration::from_millis(10)),
        )
        .await;
        router.cache().put("out.png", endpoint.clone()).await;

        let artifact = router.fetch_artifact("out.png", Some("filename=out.png")).await.unwrap();

        assert_eq!(artifact.endpoint, endpoint);
        assert_eq!(artifact.response.text().await.unwrap(), "pixels");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistently_failing_backend_exhausts_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = flaky_view_backend(Arc::clone(&calls), usize::MAX).await;
        let router = router_with(
            vec![endpoint.clone()],
            RetryPolicy::new(15, Duration::from_millis(10)),
        )
        .await;
        router.cache().put("out.png", endpoint).await;

        let err = router.fetch_artifact("out.png", Some("filename=out.png")).await.unwrap_err();

        assert_matches!(err, RoutingError::NotFound { entity: "Artifact", ref id } if id == "out.png");
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn invalid_content_type_is_rejected_before_sending() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = fake_backend(Arc::clone(&calls)).await;
        let router = router_with(vec![endpoint], RetryPolicy::artifact_fetch()).await;

        let err = router
            .upload(UploadRequest {
                kind: UploadKind::Image,
                file: UploadFile {
                    file_name: "cat.png".into(),
                    content_type: Some("not a mime type".into()),
                    bytes: vec![0; 4],
                },
                fields: vec![],
            })
            .await
            .unwrap_err();

        assert_matches!(err, RoutingError::Backend(BackendApiError::InvalidUpload(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(router.cache().is_empty().await);
    }

    #[tokio::test]
    async fn upload_records_stored_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = fake_backend(Arc::clone(&calls)).await;
        let router = router_with(vec![endpoint.clone()], RetryPolicy::artifact_fetch()).await;

        let response = router
            .upload(UploadRequest {
                kind: UploadKind::Image,
                file: UploadFile {
                    file_name: "cat.png".into(),
                    content_type: None,
                    bytes: vec![0; 16],
                },
                fields: vec![],
            })
            .await
            .unwrap();

        let name = response["name"].as_str().unwrap();
        assert_eq!(router.cache().get(name).await, Some(endpoint));
    }

    #[tokio::test]
    async fn mask_upload_follows_original_image() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let a = fake_backend(Arc::clone(&calls_a)).await;
        let b = fake_backend(Arc::clone(&calls_b)).await;
        let router = router_with(vec![a, b.clone()], RetryPolicy::artifact_fetch()).await;
        router.cache().put("photo.png", b).await;

        let original_ref = json!({"filename": "photo.png", "subfolder": "", "type": "input"});
        for _ in 0..5 {
            router
                .upload(UploadRequest {
                    kind: UploadKind::Mask,
                    file: UploadFile {
                        file_name: "mask.png".into(),
                        content_type: Some("image/png".into()),
                        bytes: vec![1; 8],
                    },
                    fields: vec![("original_ref".into(), original_ref.to_string())],
                })
                .await
                .unwrap();
        }

        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn endpoint_for_submission_without_image_stays_in_pool() {
        let endpoints: Vec<BackendEndpoint> = (2000..2004)
            .map(|p| format!("http://127.0.0.1:{p}").parse().unwrap())
            .collect();
        let router = router_with(endpoints.clone(), RetryPolicy::artifact_fetch()).await;

        let chosen = router
            .endpoint_for_submission(&Value::Object(Default::default()))
            .await;
        assert!(endpoints.contains(&chosen));
    }
}
