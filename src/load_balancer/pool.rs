//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the ordered, immutable list of backends
//! - Apply the configured selection strategy
//! - Look backends up by identifier (artifact references, affinity)

use std::sync::Arc;

use crate::config::{BackendConfig, Strategy};
use crate::load_balancer::{
    backend::Backend, hash::KeyHash, random::RandomPick, round_robin::RoundRobin, LoadBalancer,
};

/// Error building a pool. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("backend pool is empty")]
    Empty,
    #[error("backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },
}

/// Ordered backend pool with its selector.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
    strategy: Strategy,
}

impl BackendPool {
    /// Create a new backend pool from configuration, preserving order.
    pub fn new(configs: &[BackendConfig], strategy: Strategy) -> Result<Self, PoolError> {
        let backends = configs
            .iter()
            .map(|config| {
                Backend::from_config(config)
                    .map(Arc::new)
                    .map_err(|reason| PoolError::InvalidBackend {
                        name: config.name.clone(),
                        reason,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_backends(backends, strategy)
    }

    pub fn from_backends(backends: Vec<Arc<Backend>>, strategy: Strategy) -> Result<Self, PoolError> {
        if backends.is_empty() {
            return Err(PoolError::Empty);
        }

        let balancer: Box<dyn LoadBalancer> = match strategy {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::Random => Box::new(RandomPick::new()),
            Strategy::Hash => Box::new(KeyHash::new()),
        };

        for backend in &backends {
            tracing::debug!(backend = %backend.id, url = %backend.base_url, "Backend registered");
        }

        Ok(Self {
            backends,
            balancer,
            strategy,
        })
    }

    /// Pick a backend for a request with no existing affinity.
    pub fn select(&self, key: Option<&str>) -> Arc<Backend> {
        // The pool is never empty, so the selector always yields.
        self.balancer
            .next_server(&self.backends, key)
            .unwrap_or_else(|| self.backends[0].clone())
    }

    /// Look a backend up by identifier.
    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.iter().find(|b| b.id == id).cloned()
    }

    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}
