//! Network layer subsystem.
//!
//! Plain TCP is served by `axum::serve`; when a certificate is configured
//! the listener terminates TLS through `axum-server` and rustls.

pub mod tls;

pub use tls::load_tls_config;
