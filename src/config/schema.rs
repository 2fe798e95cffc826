//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the affinity proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Route definitions classifying inbound requests.
    pub routes: Vec<RouteConfig>,

    /// Backend pool, in selection order.
    pub backends: Vec<BackendConfig>,

    /// Backend selection strategy.
    pub balancing: BalancingConfig,

    /// Session affinity settings.
    pub affinity: AffinityConfig,

    /// Daily usage quota settings.
    pub quota: QuotaConfig,

    /// Trust policy evaluated before the quota gate.
    pub trust: TrustConfig,

    /// Names of client-supplied fields consumed by the proxy.
    pub fields: FieldConfig,

    /// Streamed response rewriting.
    pub stream: StreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

impl ProxyConfig {
    /// Configured routes, or the built-in set when none are declared.
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if self.routes.is_empty() {
            RouteConfig::defaults()
        } else {
            self.routes.clone()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// How long open streams may keep draining after shutdown starts.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            tls: None,
            drain_timeout_secs: 30,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Route configuration classifying a family of inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Job submissions: subject to the trust policy and the quota ledger.
    #[serde(default)]
    pub metered: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

impl RouteConfig {
    fn prefix(name: &str, prefix: &str, metered: bool, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            host: None,
            path_prefix: Some(prefix.to_string()),
            metered,
            priority,
        }
    }

    /// Routes used when the config file does not declare any.
    pub fn defaults() -> Vec<RouteConfig> {
        vec![
            Self::prefix("gradio-join", "/gradio_api/queue/join", true, 10),
            Self::prefix("gradio-call", "/gradio_api/call/", true, 10),
            Self::prefix("generate", "/api/generate", true, 10),
            Self::prefix("gradio", "/gradio_api", false, 0),
        ]
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier, embedded in artifact references.
    pub name: String,

    /// Backend address: "host:port", "host" or a full "scheme://host[:port]".
    pub address: String,
}

/// Backend selection strategy for requests without an existing affinity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    Hash,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" | "rr" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "hash" => Ok(Strategy::Hash),
            other => Err(format!("unknown balancing strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancingConfig {
    pub strategy: Strategy,
}

/// Session affinity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Lifetime of an affinity entry, counted from its creation.
    pub ttl_secs: u64,

    /// Interval of the background sweep over expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Daily quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Enable the quota gate on metered routes.
    pub enabled: bool,

    /// Admitted jobs per client per calendar day (UTC).
    pub daily_limit: u32,

    /// How long a consumed job id keeps re-admitting for free.
    pub idempotency_ttl_secs: u64,

    /// `subscriptionStatus` value that exempts a client from the limit.
    pub paid_status: String,

    /// Reject metered requests that carry no fingerprint.
    pub require_fingerprint: bool,

    /// Path of the read-only credit check endpoint.
    pub credit_check_path: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: 5,
            idempotency_ttl_secs: 600,
            paid_status: "paid".to_string(),
            require_fingerprint: true,
            credit_check_path: "/api/check-credit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    #[default]
    None,
    OriginAllowlist,
    SharedSecret,
}

/// Trust policy configuration.
///
/// Header based checks are spoofable; they keep casual third-party pages
/// off the quota, nothing more.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustConfig {
    pub mode: TrustMode,

    /// Origin/Referer prefixes accepted in `origin_allowlist` mode.
    pub allowed_origins: Vec<String>,

    /// Shared secret. Required in `shared_secret` mode; in
    /// `origin_allowlist` mode a matching secret bypasses the origin check.
    pub shared_secret: Option<String>,

    /// Header carrying the shared secret.
    pub secret_header: String,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            mode: TrustMode::None,
            allowed_origins: Vec::new(),
            shared_secret: None,
            secret_header: "x-proxy-secret".to_string(),
        }
    }
}

/// Names of the client-supplied fields read from query strings and JSON bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldConfig {
    pub fingerprint: String,
    pub subscription_status: String,
    pub job_id: String,

    /// Correlation key candidates, first present wins.
    pub correlation_keys: Vec<String>,

    /// Query parameter carrying an artifact reference.
    pub artifact_param: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            fingerprint: "fingerprint".to_string(),
            subscription_status: "subscriptionStatus".to_string(),
            job_id: "jobId".to_string(),
            correlation_keys: vec!["session_hash".to_string(), "jobId".to_string()],
            artifact_param: "file".to_string(),
        }
    }
}

impl FieldConfig {
    /// Fields that identify the client and never reach a backend.
    pub fn identity_fields(&self) -> [&str; 3] {
        [&self.fingerprint, &self.subscription_status, &self.job_id]
    }
}

/// Streamed response rewriting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Line prefix marking an event frame.
    pub event_marker: String,

    /// Longest line buffered for inspection; longer lines pass through raw.
    pub max_frame_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            event_marker: "data:".to_string(),
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Deadline for connect + response headers in seconds.
    pub first_byte_secs: u64,

    /// Maximum silence between two body chunks once streaming (0 = none).
    pub stream_idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            first_byte_secs: 120,
            stream_idle_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security response headers.
    pub enable_headers: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
