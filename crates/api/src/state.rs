use std::sync::Arc;

use relay_backend::api::BackendApi;
use relay_backend::routing::BackendRouter;
use relay_core::affinity::AffinityCache;
use relay_core::error::CoreError;
use relay_core::pool::BackendPool;

use crate::config::ServerConfig;
use crate::ws::SessionRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Affinity-aware router over the backend pool (owns pool and cache handles).
    pub router: Arc<BackendRouter>,
    /// Live WebSocket fan-out sessions.
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    /// Wire up the pool, affinity cache, HTTP client and router described
    /// by `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self, CoreError> {
        let pool = BackendPool::new(config.backends.clone())?;
        let cache = AffinityCache::new(config.affinity_ttl());
        let api = BackendApi::new(config.backend_timeout(), config.backend_insecure_tls)
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let router = BackendRouter::new(
            Arc::new(pool),
            Arc::new(cache),
            api,
            config.artifact_fetch,
        );

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            sessions: Arc::new(SessionRegistry::new()),
        })
    }
}
