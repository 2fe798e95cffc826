//! Target backend resolution.
//!
//! Order: artifact reference, then the correlation key's affinity entry,
//! then a fresh pick from the selector (registered under the key when one
//! is present).

use std::sync::Arc;

use crate::affinity::AffinityStore;
use crate::load_balancer::{Backend, BackendPool};
use crate::observability::metrics;

/// How the target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Artifact,
    Affinity,
    Fresh,
}

impl TargetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSource::Artifact => "artifact",
            TargetSource::Affinity => "affinity",
            TargetSource::Fresh => "fresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Target {
    pub backend: Arc<Backend>,
    pub source: TargetSource,
}

pub struct TargetResolver {
    pool: Arc<BackendPool>,
    affinity: Arc<dyn AffinityStore>,
}

impl TargetResolver {
    pub fn new(pool: Arc<BackendPool>, affinity: Arc<dyn AffinityStore>) -> Self {
        Self { pool, affinity }
    }

    /// `artifact_backend` is the backend id of an already decoded artifact
    /// reference; it always names a pool member.
    pub fn resolve(&self, artifact_backend: Option<&str>, key: Option<&str>) -> Target {
        if let Some(backend) = artifact_backend.and_then(|id| self.pool.get(id)) {
            return Target {
                backend,
                source: TargetSource::Artifact,
            };
        }

        let Some(key) = key else {
            return Target {
                backend: self.pool.select(None),
                source: TargetSource::Fresh,
            };
        };

        let pool = &self.pool;
        let assignment = self
            .affinity
            .get_or_assign(key, &mut || pool.select(Some(key)).id.clone());
        metrics::record_affinity_lookup(!assignment.fresh);

        match self.pool.get(&assignment.backend_id) {
            Some(backend) => Target {
                backend,
                source: if assignment.fresh {
                    TargetSource::Fresh
                } else {
                    TargetSource::Affinity
                },
            },
            None => {
                // Entry names a backend outside the pool; start a new session.
                tracing::warn!(
                    key = %key,
                    backend = %assignment.backend_id,
                    "Affinity entry names unknown backend, reassigning"
                );
                let backend = self.pool.select(Some(key));
                self.affinity.assign(key, &backend.id);
                Target {
                    backend,
                    source: TargetSource::Fresh,
                }
            }
        }
    }

    /// Drop the key's entry after a forwarding failure.
    pub fn evict(&self, key: &str) {
        if self.affinity.evict(key) {
            metrics::record_affinity_eviction();
            tracing::info!(key = %key, "Evicted affinity entry after backend failure");
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn affinity(&self) -> &Arc<dyn AffinityStore> {
        &self.affinity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::InMemoryAffinity;
    use crate::config::Strategy;
    use crate::load_balancer::test_backends;
    use std::time::Duration;

    fn resolver() -> TargetResolver {
        let pool = BackendPool::from_backends(test_backends(&["A", "B", "C"]), Strategy::RoundRobin)
            .unwrap();
        TargetResolver::new(
            Arc::new(pool),
            Arc::new(InMemoryAffinity::new(Duration::from_secs(600))),
        )
    }

    fn pick(resolver: &TargetResolver, artifact: Option<&str>, key: Option<&str>) -> String {
        resolver.resolve(artifact, key).backend.id.clone()
    }

    #[test]
    fn test_fresh_round_robin() {
        let r = resolver();
        let order: Vec<_> = (0..4).map(|_| pick(&r, None, None)).collect();
        assert_eq!(order, vec!["A", "B", "C", "A"]);
    }

    #[test]
    fn test_key_sticks() {
        let r = resolver();
        let first = r.resolve(None, Some("sess-1"));
        assert_eq!(first.source, TargetSource::Fresh);

        // Interleave other traffic; the session stays put.
        for _ in 0..5 {
            pick(&r, None, None);
            let again = r.resolve(None, Some("sess-1"));
            assert_eq!(again.backend.id, first.backend.id);
            assert_eq!(again.source, TargetSource::Affinity);
        }
    }

    #[test]
    fn test_artifact_wins() {
        let r = resolver();
        let session = pick(&r, None, Some("sess-1"));
        let other = if session == "C" { "A" } else { "C" };
        let target = r.resolve(Some(other), Some("sess-1"));
        assert_eq!(target.backend.id, other);
        assert_eq!(target.source, TargetSource::Artifact);
        // Affinity is left untouched.
        assert_eq!(pick(&r, None, Some("sess-1")), session);
    }

    #[test]
    fn test_evict_reassigns() {
        let r = resolver();
        let before = pick(&r, None, Some("sess-1"));
        r.evict("sess-1");
        let after = r.resolve(None, Some("sess-1"));
        assert_eq!(after.source, TargetSource::Fresh);
        assert_ne!(after.backend.id, before);
    }

    #[test]
    fn test_stale_entry_reassigned() {
        let r = resolver();
        r.affinity().assign("sess-9", "Z");
        let target = r.resolve(None, Some("sess-9"));
        assert_ne!(target.backend.id, "Z");
        assert_eq!(r.affinity().lookup("sess-9").as_deref(), Some(target.backend.id.as_str()));
    }
}
