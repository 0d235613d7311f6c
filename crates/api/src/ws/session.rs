//! One client WebSocket fanned out to every backend in the pool.
//!
//! A session moves through `Accepting -> Connecting -> Active -> Closing`.
//! While connecting, every backend is dialled concurrently with its own
//! retry budget; the session becomes active once all attempts have settled
//! and at least one succeeded. A client that leaves while connecting
//! cancels the outstanding attempts. In the active phase client frames are
//! broadcast to every live backend link and backend frames are funneled
//! back to the client, with completion events recorded as affinity facts
//! on the way through.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use relay_backend::client::{BackendClient, BackendConnection};
use relay_backend::funnel::{run_backend_link, RelayFrame};
use relay_backend::retry::connect_with_retry;
use relay_core::endpoint::BackendEndpoint;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::state::AppState;

/// Close code sent when the upgrade request carried no `clientId`.
pub const MISSING_CLIENT_ID: u16 = 4000;

/// Bound on a closing handshake with the client or a backend.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle phase of a fan-out session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Accepting,
    Connecting,
    Active,
    Closing,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Rejected before connecting; no `clientId`.
    MissingClientId,
    /// Every backend exhausted its connect budget.
    NoBackendReachable,
    /// The client closed or its socket failed.
    ClientDisconnected,
    /// Every backend link ended.
    BackendsClosed,
    /// Server shutdown.
    Cancelled,
}

/// Broadcast handle for one live backend link.
struct LinkHandle {
    endpoint: BackendEndpoint,
    tx: mpsc::UnboundedSender<RelayFrame>,
}

/// Drive a client socket through its whole lifecycle.
pub async fn run_session(
    mut socket: WebSocket,
    client_id: Option<String>,
    state: AppState,
) -> SessionEnd {
    let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
        tracing::warn!("WebSocket rejected: missing clientId");
        close_client(&mut socket, MISSING_CLIENT_ID, "Missing clientId").await;
        return SessionEnd::MissingClientId;
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = state
        .sessions
        .add(session_id.clone(), client_id.clone())
        .await;
    enter(&session_id, &client_id, SessionPhase::Accepting);

    enter(&session_id, &client_id, SessionPhase::Connecting);
    let policy = state.config.ws_connect;
    let connect_timeout = state.config.ws_connect_timeout();
    let attempts = state.router.pool().all().iter().cloned().map(|endpoint| {
        let client = BackendClient::new(endpoint, connect_timeout);
        let client_id = client_id.clone();
        let cancel = cancel.clone();
        async move { connect_with_retry(&client, &client_id, &policy, &cancel).await }
    });
    let mut connecting = std::pin::pin!(futures::future::join_all(attempts));

    // Client frames that arrive before Active are held and broadcast later.
    let mut pending = Vec::new();
    let mut settled = None;
    let client_left = tokio::select! {
        results = &mut connecting => {
            settled = Some(results);
            false
        }
        () = watch_client(&mut socket, &mut pending, &session_id) => true,
    };
    let results = match settled {
        Some(results) => results,
        None => {
            // Cancelled attempts return promptly; only finished handshakes remain.
            cancel.cancel();
            connecting.await
        }
    };
    let connections: Vec<BackendConnection> = results.into_iter().flatten().collect();

    if client_left {
        tracing::info!(
            session_id = %session_id,
            client_id = %client_id,
            connected = connections.len(),
            "Client left while connecting",
        );
        enter(&session_id, &client_id, SessionPhase::Closing);
        for conn in connections {
            close_backend(conn).await;
        }
        state.sessions.remove(&session_id).await;
        return SessionEnd::ClientDisconnected;
    }

    if connections.is_empty() {
        tracing::error!(
            session_id = %session_id,
            client_id = %client_id,
            "All backend connection attempts failed",
        );
        enter(&session_id, &client_id, SessionPhase::Closing);
        close_client(
            &mut socket,
            close_code::ERROR,
            "All backend connection attempts failed",
        )
        .await;
        state.sessions.remove(&session_id).await;
        return SessionEnd::NoBackendReachable;
    }

    enter(&session_id, &client_id, SessionPhase::Active);
    tracing::info!(
        session_id = %session_id,
        connected = connections.len(),
        pool = state.router.pool().len(),
        "Fan-out established",
    );

    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<RelayFrame>();
    let mut links = Vec::with_capacity(connections.len());
    let mut tasks = JoinSet::new();
    for conn in connections {
        let (tx, rx) = mpsc::unbounded_channel();
        links.push(LinkHandle {
            endpoint: conn.endpoint.clone(),
            tx,
        });
        tasks.spawn(run_backend_link(
            conn,
            rx,
            client_tx.clone(),
            state.router.cache().clone(),
            cancel.child_token(),
        ));
    }
    // Only links hold senders now, so the writer stops once they all end.
    drop(client_tx);
    for frame in pending {
        broadcast(&mut links, frame);
    }

    let (mut client_sink, mut client_stream) = socket.split();
    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if let Err(e) = client_sink.send(to_client_message(frame)).await {
                tracing::debug!(session_id = %writer_session, error = %e, "Client sink closed");
                break;
            }
        }
        client_sink
    });

    let end = tokio::select! {
        _ = cancel.cancelled() => SessionEnd::Cancelled,
        end = read_client(&mut client_stream, &mut links, &session_id) => end,
        () = drain_links(&mut tasks, &session_id) => SessionEnd::BackendsClosed,
    };

    enter(&session_id, &client_id, SessionPhase::Closing);
    cancel.cancel();
    drain_links(&mut tasks, &session_id).await;
    drop(links);

    match writer.await {
        Ok(mut sink) => {
            if end != SessionEnd::ClientDisconnected {
                let (code, reason) = match end {
                    SessionEnd::Cancelled => (close_code::AWAY, "Server shutting down"),
                    _ => (close_code::NORMAL, "Backend connections closed"),
                };
                let frame = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(frame)).await;
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
        Err(e) => tracing::error!(session_id = %session_id, error = %e, "Client writer panicked"),
    }

    state.sessions.remove(&session_id).await;
    tracing::info!(session_id = %session_id, client_id = %client_id, ?end, "Session closed");
    end
}

fn enter(session_id: &str, client_id: &str, phase: SessionPhase) {
    tracing::debug!(session_id = %session_id, client_id = %client_id, ?phase, "Session phase");
}

/// Buffer client frames until the client goes away.
///
/// Only returns on close, error or end of stream.
async fn watch_client(socket: &mut WebSocket, pending: &mut Vec<RelayFrame>, session_id: &str) {
    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => pending.push(RelayFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => pending.push(RelayFrame::Binary(bytes.to_vec())),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Client receive error");
                break;
            }
        }
    }
}

/// Close a backend connection that never became a link.
async fn close_backend(mut conn: BackendConnection) {
    match tokio::time::timeout(CLOSE_TIMEOUT, conn.ws_stream.close(None)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(endpoint = %conn.endpoint, error = %e, "Backend close error"),
        Err(_) => tracing::debug!(endpoint = %conn.endpoint, "Backend close timed out"),
    }
}

/// Read client frames and broadcast them until the client goes away.
async fn read_client(
    stream: &mut SplitStream<WebSocket>,
    links: &mut Vec<LinkHandle>,
    session_id: &str,
) -> SessionEnd {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                broadcast(links, RelayFrame::Text(text.as_str().to_owned()));
            }
            Ok(Message::Binary(bytes)) => broadcast(links, RelayFrame::Binary(bytes.to_vec())),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Client receive error");
                break;
            }
        }
    }
    SessionEnd::ClientDisconnected
}

/// Queue `frame` on every live link, forgetting links that have ended.
fn broadcast(links: &mut Vec<LinkHandle>, frame: RelayFrame) {
    links.retain(|link| match link.tx.send(frame.clone()) {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!(endpoint = %link.endpoint, "Backend link ended; dropped from broadcast");
            false
        }
    });
}

/// Wait for every backend link task to finish.
async fn drain_links(
    tasks: &mut JoinSet<relay_backend::funnel::LinkExit>,
    session_id: &str,
) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(exit) => tracing::debug!(session_id = %session_id, ?exit, "Backend link finished"),
            Err(e) => tracing::error!(session_id = %session_id, error = %e, "Backend link panicked"),
        }
    }
}

fn to_client_message(frame: RelayFrame) -> Message {
    match frame {
        RelayFrame::Text(text) => Message::Text(text.into()),
        RelayFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

async fn close_client(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }));
    if let Err(e) = socket.send(frame).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}
