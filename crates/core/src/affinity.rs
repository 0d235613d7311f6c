//! Identifier-to-backend affinity cache.
//!
//! Each backend keeps its own job state and output files, so follow-up
//! requests for a job id or an artifact name must reach the backend that
//! produced it. [`AffinityCache`] remembers that association for a limited
//! time. Writers are the submit/status/upload HTTP paths and the WebSocket
//! event funnel; the last write for a key wins.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::endpoint::BackendEndpoint;

/// How long an entry stays valid after its last write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the background sweep removes expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A single affinity fact.
#[derive(Debug, Clone)]
pub struct AffinityEntry {
    pub endpoint: BackendEndpoint,
    /// Refreshed on every write.
    pub last_seen: Instant,
}

impl AffinityEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }
}

/// Concurrent `key -> endpoint` map with time-based expiry.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared between request handlers and WebSocket sessions. The lock is only
/// held for the map operation itself, never across network I/O.
pub struct AffinityCache {
    entries: RwLock<HashMap<String, AffinityEntry>>,
    ttl: Duration,
}

impl AffinityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `key` lives on `endpoint`, overwriting any previous entry.
    pub async fn put(&self, key: impl Into<String>, endpoint: BackendEndpoint) {
        let entry = AffinityEntry {
            endpoint,
            last_seen: Instant::now(),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Look up the endpoint for `key`.
    ///
    /// An entry older than the TTL is a miss even if the sweep has not
    /// removed it yet.
    pub async fn get(&self, key: &str) -> Option<BackendEndpoint> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired(now, self.ttl))
            .map(|entry| entry.endpoint.clone())
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for AffinityCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
