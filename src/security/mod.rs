//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → trust.rs (metered routes: origin / shared secret policy)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*, drop the secret)
//!     → Forward to backend
//! ```
//!
//! # Design Decisions
//! - Trust checks run before any state is touched
//! - Header-based trust is spoofable and treated as a filter, not authentication
//! - Request body size is capped by `RequestBodyLimitLayer` in the server

pub mod headers;
pub mod trust;

pub use trust::{TrustDecision, TrustGate, TrustPolicy};
