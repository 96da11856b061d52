//! This library is an internal component of [`chunkstream`],
//! which defines the grid math, chunk coordinates, and frame timing types
//! shared by the streaming pipeline.
//! Do not depend on this library; use only [`chunkstream`] instead.
//!
//! [`chunkstream`]: https://crates.io/crates/chunkstream/

// Crate-specific lint settings. (General settings can be found in the workspace manifest.)
#![warn(clippy::missing_inline_in_public_items)]

/// Do not use this module directly; its contents are re-exported from `chunkstream`.
pub mod math;

/// Do not use this module directly; its contents are re-exported from `chunkstream`.
pub mod time;

/// Do not use this module directly; its contents are re-exported from `chunkstream`.
pub mod util;

// reexport for convenience of our tests
#[doc(hidden)]
pub use euclid;
