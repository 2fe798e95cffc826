//! Correlation-key hashing strategy.
//!
//! The same key always lands on the same backend for a fixed pool, even
//! with no affinity entry stored. SHA-256 keeps the mapping stable across
//! restarts and toolchain upgrades. Requests without a key rotate.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::load_balancer::{backend::Backend, round_robin::RoundRobin, LoadBalancer};

#[derive(Debug, Default)]
pub struct KeyHash {
    fallback: RoundRobin,
}

impl KeyHash {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Stable slot for `key` in a pool of `len` backends.
pub fn slot_for(key: &str, len: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % len as u64) as usize
}

impl LoadBalancer for KeyHash {
    fn next_server(&self, backends: &[Arc<Backend>], key: Option<&str>) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let index = match key {
            Some(key) => slot_for(key, backends.len()),
            None => self.fallback.next_index(backends.len()),
        };
        Some(backends[index].clone())
    }
}
