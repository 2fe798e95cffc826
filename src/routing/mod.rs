//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (route lookup, metered or plain)
//!     → matcher.rs (evaluate match conditions)
//!     → resolver.rs (artifact reference → affinity → fresh selection)
//!     → Return: Route + Target backend, or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod resolver;
pub mod router;

pub use resolver::{Target, TargetResolver, TargetSource};
pub use router::{Route, Router};
