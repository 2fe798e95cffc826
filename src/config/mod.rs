//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment (PORT, PROXY_BACKENDS, ...)
//!     → loader.rs (parse, deserialize, apply env overrides)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ProxyConfig (validated, immutable)
//!     → subsystems built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies the reloadable subset (quota, trust)
//! ```
//!
//! # Design Decisions
//! - The backend pool and its ordering are fixed at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{
    AdminConfig, AffinityConfig, BackendConfig, BalancingConfig, FieldConfig, ListenerConfig,
    ObservabilityConfig, ProxyConfig, QuotaConfig, RouteConfig, SecurityConfig, StreamConfig,
    Strategy, TimeoutConfig, TlsConfig, TrustConfig, TrustMode,
};
