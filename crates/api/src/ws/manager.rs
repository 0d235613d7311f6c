use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for a single live fan-out session.
pub struct SessionHandle {
    /// Client identifier supplied on the `/ws` request.
    pub client_id: String,
}

/// Tracks all live WebSocket fan-out sessions.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Every session token is a child of one
/// master token, so [`shutdown_all`](Self::shutdown_all) reaches sessions
/// that are still connecting as well.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    cancel: CancellationToken,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a session and return its cancellation token.
    ///
    /// Registering after [`shutdown_all`](Self::shutdown_all) yields an
    /// already-cancelled token.
    pub async fn add(&self, session_id: String, client_id: String) -> CancellationToken {
        let handle = SessionHandle { client_id };
        self.sessions.write().await.insert(session_id, handle);
        self.cancel.child_token()
    }

    /// Remove a session by its ID.
    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Session IDs opened on behalf of a given client.
    pub async fn get_by_client(&self, client_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, handle)| handle.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Return the current number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel every session, present and future.
    ///
    /// Sessions remove themselves once their teardown has closed all
    /// backend sockets; use [`session_count`](Self::session_count) to wait
    /// for that.
    pub async fn shutdown_all(&self) {
        let count = self.sessions.read().await.len();
        self.cancel.cancel();
        tracing::info!(count, "Cancelled all WebSocket sessions");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
