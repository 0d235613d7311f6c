//! WebSocket client for connecting to a backend worker.
//!
//! [`BackendClient`] holds the connection configuration for a single
//! backend. Call [`BackendClient::connect`] to establish a live
//! [`BackendConnection`] on behalf of one proxied client.

use std::time::Duration;

use relay_core::endpoint::BackendEndpoint;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw WebSocket stream to a backend.
pub type BackendStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for one backend's event stream.
#[derive(Debug, Clone)]
pub struct BackendClient {
    endpoint: BackendEndpoint,
    connect_timeout: Duration,
}

/// A live WebSocket connection to a backend.
pub struct BackendConnection {
    /// Endpoint this connection belongs to.
    pub endpoint: BackendEndpoint,
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: BackendStream,
}

impl BackendClient {
    pub fn new(endpoint: BackendEndpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Connect to the backend's `/ws` endpoint.
    ///
    /// The proxied client's id is passed through as the `clientId` query
    /// parameter so the backend addresses its events to that client.
    pub async fn connect(&self, client_id: &str) -> Result<BackendConnection, BackendClientError> {
        let mut url = reqwest::Url::parse(&format!("{}/ws", self.endpoint.ws_url()))
            .map_err(|e| BackendClientError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("clientId", client_id);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| BackendClientError::Timeout(self.connect_timeout))?
                .map_err(|e| {
                    BackendClientError::Connection(format!(
                        "Failed to connect to backend at {}: {e}",
                        self.endpoint
                    ))
                })?;

        tracing::debug!(
            endpoint = %self.endpoint,
            client_id = %client_id,
            "Connected to backend event stream",
        );

        Ok(BackendConnection {
            endpoint: self.endpoint.clone(),
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when opening a backend WebSocket.
#[derive(Debug, thiserror::Error)]
pub enum BackendClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be turned into a WebSocket URL.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}
