//! Session-affine reverse proxy for a pool of job-processing backends.
//!
//! Pins multi-step sessions to one backend, rewrites artifact references
//! in streamed completion events so later fetches find the backend that
//! produced them, and meters job submissions against a daily per-client
//! quota.

pub mod admin;
pub mod affinity;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod locator;
pub mod net;
pub mod observability;
pub mod quota;
pub mod resilience;
pub mod rewrite;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
