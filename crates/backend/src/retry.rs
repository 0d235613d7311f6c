//! Bounded fixed-delay retry for backend connections.
//!
//! A fan-out session calls [`connect_with_retry`] once per backend. Each
//! call keeps trying until the connection succeeds, the attempt budget in
//! the [`RetryPolicy`] runs out, or the [`CancellationToken`] fires.
//! The same policy type bounds artifact polling in the router.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{BackendClient, BackendConnection};

/// Attempt budget and spacing for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Zero means one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Backend WebSocket connects: 30 attempts, 2 seconds apart.
    pub const fn backend_connect() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Artifact lookups: 15 attempts, 1 second apart.
    pub const fn artifact_fetch() -> Self {
        Self::new(15, Duration::from_secs(1))
    }

    /// Attempt budget with the zero case normalized to a single try.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Connect to a backend, retrying with a fixed delay.
///
/// Returns `Some(connection)` on the first success, or `None` when every
/// attempt failed or `cancel` was triggered.
pub async fn connect_with_retry(
    client: &BackendClient,
    client_id: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Option<BackendConnection> {
    let attempts = policy.attempts();

    for attempt in 1..=attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(endpoint = %client.endpoint(), "Connect cancelled");
                return None;
            }
            result = client.connect(client_id) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(
                            endpoint = %client.endpoint(),
                            attempt,
                            "Connected to backend",
                        );
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %client.endpoint(),
                            error = %e,
                            "Connect attempt {attempt}/{attempts} failed",
                        );
                    }
                }
            }
        }

        if attempt == attempts {
            break;
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    tracing::warn!(
        endpoint = %client.endpoint(),
        attempts,
        "Giving up on backend",
    );
    None
}
