//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, body limit, tracing)
//!     → credit.rs (read-only credit check)
//!     → proxy.rs (route, trust, resolve target, quota, forward)
//!         → request.rs (client fields, artifact references, stripping)
//!         → response.rs (streamed relay, stream lifetime tracking)
//!     → Send to client
//! ```

pub mod credit;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer, ProxyState};
