//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next slot in `0..len`. The counter wraps on overflow.
    pub(crate) fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>], _key: Option<&str>) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        Some(backends[self.next_index(backends.len())].clone())
    }
}
