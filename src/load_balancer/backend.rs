//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend instance (identifier + base URL)
//! - Build upstream URLs and the Host header value
//! - Track in-flight requests for the admin view

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use crate::config::BackendConfig;

/// Parse a configured backend address into its base URL.
///
/// Accepts "host", "host:port" (http assumed) or "scheme://host[:port]".
pub fn parse_backend_url(address: &str) -> Result<Url, String> {
    let address = address.trim();
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&candidate).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    if url.path() != "/" || url.query().is_some() {
        return Err("backend address must not carry a path or query".to_string());
    }
    Ok(url)
}

/// A single backend instance. Immutable once loaded.
#[derive(Debug)]
pub struct Backend {
    /// Identifier embedded in artifact references.
    pub id: String,
    /// Base URL (scheme + authority).
    pub base_url: Url,
    /// Requests currently being served by this backend.
    in_flight: AtomicUsize,
}

impl Backend {
    /// Create a new backend.
    pub fn new(id: impl Into<String>, base_url: Url) -> Self {
        Self {
            id: id.into(),
            base_url,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Build a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> Result<Self, String> {
        Ok(Self::new(config.name.clone(), parse_backend_url(&config.address)?))
    }

    /// "scheme://host[:port]" without a trailing slash.
    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    /// Value for the Host header sent upstream.
    pub fn authority(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Absolute upstream URL for an origin-form request target.
    pub fn url_for(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.origin(), path_and_query)
        } else {
            format!("{}/{}", self.origin(), path_and_query)
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count a request against this backend until the guard is dropped.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            backend: self.clone(),
        }
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct InFlightGuard {
    backend: Arc<Backend>,
}

impl Deref for InFlightGuard {
    type Target = Arc<Backend>;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
