//! In-memory affinity table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::affinity::{AffinityStore, Assignment};

#[derive(Debug, Clone)]
struct AffinityEntry {
    backend_id: String,
    created_at: Instant,
}

impl AffinityEntry {
    fn new(backend_id: String, created_at: Instant) -> Self {
        Self {
            backend_id,
            created_at,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Process-local affinity table, lost on restart.
#[derive(Debug)]
pub struct InMemoryAffinity {
    entries: DashMap<String, AffinityEntry>,
    ttl: Duration,
}

impl InMemoryAffinity {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub(crate) fn lookup_at(&self, key: &str, now: Instant) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now, self.ttl))
            .map(|entry| entry.backend_id.clone())
    }

    pub(crate) fn get_or_assign_at(
        &self,
        key: &str,
        now: Instant,
        assign: &mut dyn FnMut() -> String,
    ) -> Assignment {
        let mut fresh = false;
        // The shard lock is held while `assign` runs; selectors never block.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            fresh = true;
            AffinityEntry::new(assign(), now)
        });

        if entry.is_expired(now, self.ttl) {
            *entry = AffinityEntry::new(assign(), now);
            fresh = true;
        }

        Assignment {
            backend_id: entry.backend_id.clone(),
            fresh,
        }
    }

    pub(crate) fn expire_sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        before.saturating_sub(self.entries.len())
    }
}

impl AffinityStore for InMemoryAffinity {
    fn lookup(&self, key: &str) -> Option<String> {
        self.lookup_at(key, Instant::now())
    }

    fn get_or_assign(&self, key: &str, assign: &mut dyn FnMut() -> String) -> Assignment {
        self.get_or_assign_at(key, Instant::now(), assign)
    }

    fn assign(&self, key: &str, backend_id: &str) {
        self.entries.insert(
            key.to_string(),
            AffinityEntry::new(backend_id.to_string(), Instant::now()),
        );
    }

    fn evict(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn expire_sweep(&self) -> usize {
        self.expire_sweep_at(Instant::now())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn pinned_per_backend(&self) -> HashMap<String, usize> {
        let now = Instant::now();
        let mut counts = HashMap::new();
        for entry in self.entries.iter() {
            if !entry.is_expired(now, self.ttl) {
                *counts.entry(entry.backend_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rotating(names: &'static [&'static str]) -> impl FnMut() -> String {
        let mut i = 0;
        move || {
            let name = names[i % names.len()];
            i += 1;
            name.to_string()
        }
    }

    #[test]
    fn test_sticky_within_ttl() {
        let table = InMemoryAffinity::new(Duration::from_secs(600));
        let mut select = rotating(&["A", "B", "C"]);
        let now = Instant::now();

        let first = table.get_or_assign_at("session-1", now, &mut select);
        assert!(first.fresh);
        assert_eq!(first.backend_id, "A");

        for offset in [1, 60, 599] {
            let again =
                table.get_or_assign_at("session-1", now + Duration::from_secs(offset), &mut select);
            assert!(!again.fresh);
            assert_eq!(again.backend_id, "A");
        }

        let other = table.get_or_assign_at("session-2", now, &mut select);
        assert_eq!(other.backend_id, "B");
    }

    #[test]
    fn test_expired_entry_is_reassigned() {
        let table = InMemoryAffinity::new(Duration::from_secs(600));
        let mut select = rotating(&["A", "B"]);
        let now = Instant::now();

        table.get_or_assign_at("k", now, &mut select);
        let later = now + Duration::from_secs(600);
        assert_eq!(table.lookup_at("k", later), None);

        let reassigned = table.get_or_assign_at("k", later, &mut select);
        assert!(reassigned.fresh);
        assert_eq!(reassigned.backend_id, "B");
    }

    #[test]
    fn test_evict_forces_reassignment() {
        let table = InMemoryAffinity::new(Duration::from_secs(600));
        let mut select = rotating(&["A", "B"]);

        assert_eq!(table.get_or_assign("k", &mut select).backend_id, "A");
        assert!(table.evict("k"));
        assert!(!table.evict("k"));
        assert_eq!(table.lookup("k"), None);

        let next = table.get_or_assign("k", &mut select);
        assert!(next.fresh);
        assert_eq!(next.backend_id, "B");
    }

    #[test]
    fn test_sweep() {
        let table = InMemoryAffinity::new(Duration::from_secs(10));
        let now = Instant::now();
        let mut select = rotating(&["A"]);

        table.get_or_assign_at("old", now, &mut select);
        table.get_or_assign_at("new", now + Duration::from_secs(8), &mut select);

        assert_eq!(table.expire_sweep_at(now + Duration::from_secs(12)), 1);
        assert_eq!(table.len(), 1);
        assert!(table.lookup_at("new", now + Duration::from_secs(12)).is_some());
    }

    #[test]
    fn test_concurrent_first_assignment_is_single() {
        let table = Arc::new(InMemoryAffinity::new(Duration::from_secs(600)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    let mut select = || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        format!("backend-{}", n)
                    };
                    table.get_or_assign("shared", &mut select).backend_id
                })
            })
            .collect();

        let results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|id| id == &results[0]));
    }

    #[test]
    fn test_pinned_per_backend() {
        let table = InMemoryAffinity::new(Duration::from_secs(600));
        table.assign("a", "A");
        table.assign("b", "A");
        table.assign("c", "B");
        let counts = table.pinned_per_backend();
        assert_eq!(counts.get("A"), Some(&2));
        assert_eq!(counts.get("B"), Some(&1));
    }
}
