//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the backend pool is usable and its names are encodable
//! - Validate value ranges (TTLs > 0, paths well formed)
//! - Check the trust policy carries what its mode needs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ProxyConfig, TrustMode, PLACEHOLDER_API_KEY};
use crate::load_balancer::backend::parse_backend_url;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend pool is empty")]
    EmptyBackendPool,

    #[error("duplicate backend name '{0}'")]
    DuplicateBackend(String),

    #[error("backend name '{0}' must be non-empty and must not contain '/'")]
    InvalidBackendName(String),

    #[error("backend '{name}' has invalid address '{address}': {reason}")]
    InvalidBackendAddress {
        name: String,
        address: String,
        reason: String,
    },

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("route '{0}' path prefix must start with '/'")]
    InvalidRoutePrefix(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("credit check path '{0}' must start with '/'")]
    InvalidCreditCheckPath(String),

    #[error("trust mode shared_secret requires trust.shared_secret")]
    MissingSharedSecret,

    #[error("trust mode origin_allowlist requires at least one allowed origin")]
    MissingAllowedOrigins,

    #[error("admin API is enabled with the placeholder api_key")]
    PlaceholderAdminKey,

    #[error("stream.event_marker must not be empty")]
    EmptyEventMarker,
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::EmptyBackendPool);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.is_empty() || backend.name.contains('/') {
            errors.push(ValidationError::InvalidBackendName(backend.name.clone()));
        }
        if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if let Err(reason) = parse_backend_url(&backend.address) {
            errors.push(ValidationError::InvalidBackendAddress {
                name: backend.name.clone(),
                address: backend.address.clone(),
                reason,
            });
        }
    }

    for route in &config.routes {
        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidRoutePrefix(route.name.clone()));
            }
        }
    }

    if config.affinity.ttl_secs == 0 {
        errors.push(ValidationError::ZeroValue("affinity.ttl_secs"));
    }
    if config.affinity.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroValue("affinity.sweep_interval_secs"));
    }
    if config.quota.idempotency_ttl_secs == 0 {
        errors.push(ValidationError::ZeroValue("quota.idempotency_ttl_secs"));
    }
    if config.timeouts.first_byte_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.first_byte_secs"));
    }
    if config.stream.max_frame_bytes == 0 {
        errors.push(ValidationError::ZeroValue("stream.max_frame_bytes"));
    }
    if config.stream.event_marker.is_empty() {
        errors.push(ValidationError::EmptyEventMarker);
    }
    if !config.quota.credit_check_path.starts_with('/') {
        errors.push(ValidationError::InvalidCreditCheckPath(
            config.quota.credit_check_path.clone(),
        ));
    }

    let has_secret = config
        .trust
        .shared_secret
        .as_deref()
        .is_some_and(|s| !s.is_empty());
    match config.trust.mode {
        TrustMode::SharedSecret if !has_secret => errors.push(ValidationError::MissingSharedSecret),
        TrustMode::OriginAllowlist if config.trust.allowed_origins.is_empty() => {
            errors.push(ValidationError::MissingAllowedOrigins)
        }
        _ => {}
    }

    if config.admin.enabled && config.admin.api_key == PLACEHOLDER_API_KEY {
        errors.push(ValidationError::PlaceholderAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
