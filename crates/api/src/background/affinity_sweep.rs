//! Periodic eviction of expired affinity entries.
//!
//! Lookups already treat expired entries as misses; this keeps memory
//! bounded when facts are written and never read again.

use std::sync::Arc;
use std::time::Duration;

use relay_core::affinity::AffinityCache;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop every `interval` until `cancel` is triggered.
pub async fn run(cache: Arc<AffinityCache>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        ttl_secs = cache.ttl().as_secs(),
        "Affinity sweep job started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can have expired yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Affinity sweep job stopping");
                break;
            }
            _ = ticker.tick() => {
                let removed = cache.sweep().await;
                if removed > 0 {
                    let remaining = cache.len().await;
                    tracing::info!(removed, remaining, "Affinity sweep: evicted expired entries");
                } else {
                    tracing::debug!("Affinity sweep: nothing expired");
                }
            }
        }
    }
}
