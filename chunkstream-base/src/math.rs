//! Mathematical utilities and decisions.

mod aab;
pub use aab::*;
mod chunk;
pub use chunk::*;
mod coord;
pub use coord::*;
mod cube;
pub use cube::Cube;
mod face;
pub use face::*;
mod frustum;
pub use frustum::*;
mod grid_aab;
pub use grid_aab::*;

// We make an assumption in several places that `usize` is at least 32 bits.
#[cfg(target_pointer_width = "16")]
compile_error!("chunkstream does not support platforms with less than 32-bit `usize`");
