//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! Request with correlation key K (no artifact reference)
//!     → AffinityStore::get_or_assign(K, selector)
//!         live entry  → its backend
//!         none/expired → selector picks, entry stored with fresh TTL
//!     → forwarding failure → evict(K), next retry is reassigned
//!
//! Background sweeper (every sweep_interval):
//!     → expire_sweep() drops entries older than the TTL
//! ```
//!
//! # Design Decisions
//! - TTL counts from creation and is not extended by use
//! - Entries store backend identifiers, so a durable store can hold them
//! - Re-use of a key after eviction or expiry is a brand-new session

use std::collections::HashMap;

pub mod table;

pub use table::InMemoryAffinity;

/// Outcome of an affinity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub backend_id: String,
    /// True when the entry was created by this call.
    pub fresh: bool,
}

/// Storage-agnostic interface of the affinity table.
pub trait AffinityStore: Send + Sync {
    /// Backend of the live entry for `key`, if any.
    fn lookup(&self, key: &str) -> Option<String>;

    /// Return the live entry for `key`, or store the backend produced by
    /// `assign` with a fresh TTL. Lookup and insert are atomic per key.
    fn get_or_assign(&self, key: &str, assign: &mut dyn FnMut() -> String) -> Assignment;

    /// Unconditionally pin `key` to `backend_id` with a fresh TTL.
    fn assign(&self, key: &str, backend_id: &str);

    /// Remove the entry for `key`. Returns whether one existed.
    fn evict(&self, key: &str) -> bool;

    /// Remove expired entries, returning how many were dropped.
    fn expire_sweep(&self) -> usize;

    /// Number of stored entries, expired ones included until swept.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries per backend identifier.
    fn pinned_per_backend(&self) -> HashMap<String, usize>;
}
