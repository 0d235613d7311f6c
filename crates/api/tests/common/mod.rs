#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use relay_api::config::ServerConfig;
use relay_api::router::build_app_router;
use relay_api::state::AppState;
use relay_backend::retry::RetryPolicy;
use relay_core::endpoint::BackendEndpoint;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct FakeState {
    port: u16,
    prompts: Arc<AtomicUsize>,
    history_calls: Arc<AtomicUsize>,
    uploads: Arc<Mutex<Vec<String>>>,
    artifacts: Arc<Mutex<Vec<String>>>,
    client_ids: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<AtomicUsize>,
    events: broadcast::Sender<String>,
    received: mpsc::UnboundedSender<String>,
}

/// An in-process stand-in for one stateful backend.
///
/// Serves the same paths as a real backend. Job IDs and uploaded file
/// names embed the port so tests can tell which backend answered.
pub struct FakeBackend {
    pub endpoint: BackendEndpoint,
    pub port: u16,
    pub prompts: Arc<AtomicUsize>,
    pub history_calls: Arc<AtomicUsize>,
    /// Upload kinds (`image` / `mask`) in arrival order.
    pub uploads: Arc<Mutex<Vec<String>>>,
    /// File names this backend can serve from `/view`.
    pub artifacts: Arc<Mutex<Vec<String>>>,
    /// `clientId` of every WebSocket opened against this backend.
    pub client_ids: Arc<Mutex<Vec<String>>>,
    /// WebSocket connections that have since ended.
    pub disconnects: Arc<AtomicUsize>,
    events: broadcast::Sender<String>,
    /// Text frames received over WebSocket.
    pub received: mpsc::UnboundedReceiver<String>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events, _) = broadcast::channel(64);
        let (received_tx, received) = mpsc::unbounded_channel();

        let state = FakeState {
            port,
            prompts: Arc::new(AtomicUsize::new(0)),
            history_calls: Arc::new(AtomicUsize::new(0)),
            uploads: Arc::new(Mutex::new(Vec::new())),
            artifacts: Arc::new(Mutex::new(Vec::new())),
            client_ids: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
            events: events.clone(),
            received: received_tx,
        };

        let app = Router::new()
            .route("/prompt", post(fake_prompt))
            .route("/history/{id}", routing::get(fake_history))
            .route("/view", routing::get(fake_view))
            .route("/upload/{kind}", post(fake_upload))
            .route("/ws", routing::get(fake_ws))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            endpoint: format!("http://127.0.0.1:{port}").parse().unwrap(),
            port,
            prompts: state.prompts,
            history_calls: state.history_calls,
            uploads: state.uploads,
            artifacts: state.artifacts,
            client_ids: state.client_ids,
            disconnects: state.disconnects,
            events,
            received,
        }
    }

    /// Make `filename` available on `/view` and announce it on every open
    /// event stream as a completion event.
    pub fn complete(&self, filename: &str) {
        self.artifacts.lock().unwrap().push(filename.to_string());
        let event = json!({
            "type": "executed",
            "data": {"node": "9", "output": {"images": [{"filename": filename, "type": "output"}]}},
        });
        let _ = self.events.send(event.to_string());
    }

    /// Send a raw text frame on every open event stream.
    pub fn emit(&self, text: &str) {
        let _ = self.events.send(text.to_string());
    }

    pub fn ws_connections(&self) -> usize {
        self.client_ids.lock().unwrap().len()
    }

    pub fn ws_disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

async fn fake_prompt(State(s): State<FakeState>, Json(_payload): Json<Value>) -> Json<Value> {
    let n = s.prompts.fetch_add(1, Ordering::SeqCst);
    Json(json!({"prompt_id": format!("job-{}-{n}", s.port), "number": n, "node_errors": {}}))
}

async fn fake_history(State(s): State<FakeState>, Path(id): Path<String>) -> Json<Value> {
    s.history_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        id: {"outputs": {"9": {"images": [{"filename": format!("hist-{}.png", s.port)}]}}}
    }))
}

async fn fake_view(
    State(s): State<FakeState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filename = params.get("filename").cloned().unwrap_or_default();
    if !s.artifacts.lock().unwrap().contains(&filename) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let subfolder = params.get("subfolder").cloned().unwrap_or_default();
    (
        [(CONTENT_TYPE, "image/png")],
        format!("{}:{subfolder}:{filename}", s.port),
    )
        .into_response()
}

async fn fake_upload(
    State(s): State<FakeState>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut file_name = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("image") {
            file_name = field.file_name().map(str::to_string);
        }
    }
    let Some(file_name) = file_name else {
        return (StatusCode::BAD_REQUEST, "no image part").into_response();
    };
    s.uploads.lock().unwrap().push(kind);
    let stored = format!("{}-{file_name}", s.port);
    s.artifacts.lock().unwrap().push(stored.clone());
    Json(json!({"name": stored, "subfolder": "", "type": "input"})).into_response()
}

async fn fake_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(s): State<FakeState>,
) -> Response {
    let mut events = s.events.subscribe();
    if let Some(id) = params.get("clientId") {
        s.client_ids.lock().unwrap().push(id.clone());
    }
    ws.on_upgrade(move |mut socket| async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = s.received.send(text.as_str().to_owned());
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        s.disconnects.fetch_add(1, Ordering::SeqCst);
    })
}

/// An endpoint nothing is listening on.
pub async fn dead_endpoint() -> BackendEndpoint {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}").parse().unwrap()
}

// ---------------------------------------------------------------------------
// Proxy under test
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` over `backends` with short retry budgets.
pub fn test_config(backends: Vec<BackendEndpoint>) -> ServerConfig {
    let mut config = ServerConfig::from_lookup(|_| None).unwrap();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.cors_origins = vec!["http://localhost:5173".to_string()];
    config.backends = backends;
    config.backend_timeout_secs = 5;
    config.artifact_fetch = RetryPolicy::new(20, Duration::from_millis(100));
    config.ws_connect = RetryPolicy::new(3, Duration::from_millis(50));
    config.ws_connect_timeout_secs = 2;
    config
}

/// Build the application router and its state from `config`.
///
/// Uses the same middleware stack as the production binary.
pub fn build_test_app(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::from_config(config.clone()).unwrap();
    let app = build_app_router(state.clone(), &config).unwrap();
    (app, state)
}

/// Serve the application on an ephemeral port (needed for WebSocket tests).
pub async fn serve_test_app(config: ServerConfig) -> (SocketAddr, AppState) {
    let (app, state) = build_test_app(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

const BOUNDARY: &str = "relay-test-boundary";

/// POST a multipart body with one file part (`image`) and text fields.
pub async fn post_multipart(
    app: Router,
    uri: &str,
    file: Option<(&str, &[u8])>,
    fields: &[(&str, &str)],
) -> Response {
    let mut body = Vec::new();
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
