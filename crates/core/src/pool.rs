//! Static pool of backend workers.

use std::collections::HashSet;

use rand::Rng;

use crate::endpoint::BackendEndpoint;
use crate::error::CoreError;

/// Ordered, immutable list of backend endpoints configured at startup.
#[derive(Debug, Clone)]
pub struct BackendPool {
    endpoints: Vec<BackendEndpoint>,
}

impl BackendPool {
    /// Build a pool, dropping duplicate endpoints (first occurrence wins).
    ///
    /// Fails when no endpoint is given: every routing decision needs at
    /// least one candidate.
    pub fn new(endpoints: Vec<BackendEndpoint>) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        let endpoints: Vec<_> = endpoints
            .into_iter()
            .filter(|ep| seen.insert(ep.clone()))
            .collect();

        if endpoints.is_empty() {
            return Err(CoreError::Validation(
                "Backend pool must contain at least one endpoint".into(),
            ));
        }

        Ok(Self { endpoints })
    }

    pub fn all(&self) -> &[BackendEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &BackendEndpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    /// Uniformly random endpoint, for requests with no known affinity.
    pub fn pick_arbitrary(&self) -> &BackendEndpoint {
        let idx = rand::rng().random_range(0..self.endpoints.len());
        &self.endpoints[idx]
    }
}
