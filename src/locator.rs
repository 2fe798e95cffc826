//! Artifact reference codec.
//!
//! An artifact reference is `<backend-id>/<backend-local path>`. It carries
//! the producing backend inside the string, so a later request for the file
//! can be routed without any stored table. Backend identifiers never contain
//! `/` (enforced by config validation), which makes the first `/` the split
//! point and the encoding reversible for any local path.

use std::collections::HashSet;

use thiserror::Error;

use crate::load_balancer::BackendPool;

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("artifact reference '{0}' has no backend segment")]
    Malformed(String),

    #[error("artifact reference names unknown backend '{0}'")]
    UnknownBackend(String),
}

/// A decoded artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub backend_id: String,
    pub local_path: String,
}

/// Stateless codec validating backend membership against the pool.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    known: HashSet<String>,
}

impl ArtifactLocator {
    pub fn new<I, S>(backend_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: backend_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_pool(pool: &BackendPool) -> Self {
        Self::new(pool.all().iter().map(|b| b.id.clone()))
    }

    /// Compose a reference from a backend identifier and a local path.
    pub fn encode(&self, backend_id: &str, local_path: &str) -> String {
        encode(backend_id, local_path)
    }

    /// Split a reference, rejecting backends outside the pool.
    pub fn decode(&self, reference: &str) -> Result<ArtifactRef, LocatorError> {
        let (backend_id, local_path) = reference
            .split_once(SEPARATOR)
            .filter(|(id, _)| !id.is_empty())
            .ok_or_else(|| LocatorError::Malformed(reference.to_string()))?;

        if !self.known.contains(backend_id) {
            return Err(LocatorError::UnknownBackend(backend_id.to_string()));
        }

        Ok(ArtifactRef {
            backend_id: backend_id.to_string(),
            local_path: local_path.to_string(),
        })
    }
}

/// Pure string composition; no pool needed.
pub fn encode(backend_id: &str, local_path: &str) -> String {
    let mut reference = String::with_capacity(backend_id.len() + 1 + local_path.len());
    reference.push_str(backend_id);
    reference.push(SEPARATOR);
    reference.push_str(local_path);
    reference
}
