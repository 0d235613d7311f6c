//! Per-backend relay loop for a fan-out session.
//!
//! Owns one backend WebSocket. Frames the session broadcasts arrive on an
//! outbound channel and are written to the backend in order; frames the
//! backend emits are inspected for completion events, recorded in the
//! [`AffinityCache`], and funneled unchanged to the client channel.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::affinity::AffinityCache;
use relay_core::endpoint::BackendEndpoint;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::BackendConnection;
use crate::messages::parse_event;

/// Upper bound on the closing handshake with a backend.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A data frame travelling between the client and a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<RelayFrame> for Message {
    fn from(frame: RelayFrame) -> Self {
        match frame {
            RelayFrame::Text(text) => Message::Text(text),
            RelayFrame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Why a backend link stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    /// The session cancelled the link or dropped its outbound sender.
    Cancelled,
    /// The backend closed the connection or the stream ended.
    BackendClosed,
    /// Reading from the backend failed.
    ReceiveFailed,
    /// Writing a broadcast frame to the backend failed.
    SendFailed,
    /// The client channel is gone; nothing left to funnel to.
    ClientGone,
}

/// Record an affinity fact if `text` is a completion event naming an
/// output artifact. Returns the recorded artifact name.
///
/// Malformed frames are ignored here; the caller relays them regardless.
pub async fn mine_event(
    text: &str,
    endpoint: &BackendEndpoint,
    cache: &AffinityCache,
) -> Option<String> {
    let event = match parse_event(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(endpoint = %endpoint, error = %e, "Unparseable backend event");
            return None;
        }
    };

    let artifact = event.completed_artifact()?.to_string();
    cache.put(artifact.clone(), endpoint.clone()).await;
    tracing::info!(
        endpoint = %endpoint,
        artifact = %artifact,
        "Recorded artifact affinity from completion event",
    );
    Some(artifact)
}

/// Relay frames between one backend and the session until something ends it.
///
/// The backend socket is always closed before returning, whatever the
/// exit reason.
pub async fn run_backend_link(
    conn: BackendConnection,
    mut outbound: mpsc::UnboundedReceiver<RelayFrame>,
    client_tx: mpsc::UnboundedSender<RelayFrame>,
    cache: Arc<AffinityCache>,
    cancel: CancellationToken,
) -> LinkExit {
    let endpoint = conn.endpoint;
    let (mut sink, mut stream) = conn.ws_stream.split();

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => break LinkExit::Cancelled,

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break LinkExit::Cancelled;
                };
                if let Err(e) = sink.send(frame.into()).await {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Failed to send to backend");
                    break LinkExit::SendFailed;
                }
            }

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    mine_event(&text, &endpoint, &cache).await;
                    if client_tx.send(RelayFrame::Text(text)).is_err() {
                        break LinkExit::ClientGone;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    // Preview images; relayed untouched.
                    if client_tx.send(RelayFrame::Binary(bytes)).is_err() {
                        break LinkExit::ClientGone;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(endpoint = %endpoint, ?frame, "Backend closed event stream");
                    break LinkExit::BackendClosed;
                }
                Some(Err(e)) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Backend receive error");
                    break LinkExit::ReceiveFailed;
                }
                None => break LinkExit::BackendClosed,
            },
        }
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(endpoint = %endpoint, error = %e, "Backend close error"),
        Err(_) => tracing::debug!(endpoint = %endpoint, "Backend close timed out"),
    }

    tracing::debug!(endpoint = %endpoint, ?exit, "Backend link stopped");
    exit
}
