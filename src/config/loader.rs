//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{BackendConfig, ProxyConfig, Strategy};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("startup failed: {0}")]
    Startup(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load, apply environment overrides, and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let mut config = read_config(path)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build configuration from defaults plus environment only.
pub fn load_from_env() -> Result<ProxyConfig, ConfigError> {
    let mut config = ProxyConfig::default();
    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PORT`, `PROXY_BACKENDS`, `PROXY_DAILY_LIMIT`, `PROXY_SHARED_SECRET`
/// and `PROXY_BALANCING` from the process environment.
pub fn apply_env_overrides(config: &mut ProxyConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_overrides_from<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::Env {
            name: "PORT",
            reason: format!("'{}' is not a port number", port),
        })?;
        config.listener.bind_address = format!("0.0.0.0:{}", port);
    }

    if let Some(list) = lookup("PROXY_BACKENDS") {
        config.backends = parse_backend_list(&list);
    }

    if let Some(limit) = lookup("PROXY_DAILY_LIMIT") {
        config.quota.daily_limit = limit.trim().parse().map_err(|_| ConfigError::Env {
            name: "PROXY_DAILY_LIMIT",
            reason: format!("'{}' is not a non-negative integer", limit),
        })?;
    }

    if let Some(secret) = lookup("PROXY_SHARED_SECRET") {
        if !secret.is_empty() {
            config.trust.shared_secret = Some(secret);
        }
    }

    if let Some(strategy) = lookup("PROXY_BALANCING") {
        config.balancing.strategy = strategy
            .parse::<Strategy>()
            .map_err(|reason| ConfigError::Env {
                name: "PROXY_BALANCING",
                reason,
            })?;
    }

    Ok(())
}

/// Parse `addr` / `name=addr` entries separated by commas.
/// Unnamed entries are numbered by position: `backend-1`, `backend-2`, ...
pub fn parse_backend_list(list: &str) -> Vec<BackendConfig> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(i, entry)| match entry.split_once('=') {
            Some((name, address)) => BackendConfig {
                name: name.trim().to_string(),
                address: address.trim().to_string(),
            },
            None => BackendConfig {
                name: format!("backend-{}", i + 1),
                address: entry.to_string(),
            },
        })
        .collect()
}
