//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request with no artifact reference and no live affinity
//!     → pool.rs (ordered backend list, fixed at startup)
//!     → Apply the configured strategy:
//!         - round_robin.rs (shared counter modulo pool size)
//!         - random.rs (uniform over pool indices)
//!         - hash.rs (stable function of the correlation key)
//!     → backend.rs (base URL, in-flight tracking)
//! ```
//!
//! # Design Decisions
//! - Selectors are lock-free; round-robin uses a single atomic counter
//! - An empty pool is a configuration error, never a runtime one
//! - One strategy per pool

use std::sync::Arc;

pub mod backend;
pub mod hash;
pub mod pool;
pub mod random;
pub mod round_robin;

pub use backend::Backend;
pub use pool::{BackendPool, PoolError};

/// Backend selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Choose a backend. `key` is the request's correlation key, if any.
    fn next_server(&self, backends: &[Arc<Backend>], key: Option<&str>) -> Option<Arc<Backend>>;
}

#[cfg(test)]
pub(crate) fn test_backends(names: &[&str]) -> Vec<Arc<Backend>> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let url = backend::parse_backend_url(&format!("127.0.0.1:{}", 9000 + i)).unwrap();
            Arc::new(Backend::new(*name, url))
        })
        .collect()
}
