//! Tools that we could imagine being in the Rust standard library, but aren't.

pub use manyfmt::{Fmt, Refmt};

mod custom_format;
pub use custom_format::*;

/// Logging helpers for hosts of the streaming pipeline.
pub mod log;
