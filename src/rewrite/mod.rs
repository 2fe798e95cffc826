//! Response rewriting.
//!
//! # Data Flow
//! ```text
//! upstream chunks
//!     → frame.rs (split into lines, bounded buffer)
//!     → payload.rs (completion events: encode artifact paths)
//!     → stream.rs (reassemble, hand downstream as produced)
//! ```

pub mod frame;
pub mod payload;
pub mod stream;

pub use stream::{rewrite_stream, FrameRewriter};
