//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (connect + first-byte deadline)
//!     → streaming: timeouts.rs (optional idle deadline per chunk)
//!     → failure: affinity entry evicted, retryable error to the client
//! ```
//!
//! # Design Decisions
//! - Every backend call has a deadline before its first byte
//! - No automatic retries: job submissions are not idempotent, the client retries
//! - A failed backend only loses the session that hit the failure

pub mod timeouts;
