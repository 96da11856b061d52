//! Axis-aligned unit vectors: the [`Face6`] type.
//! This module is private but reexported by its parent.

use crate::math::{GridCoordinate, GridVector};

/// Identifies a face of a cube or an orthogonal unit vector.
///
/// Used by the pipeline to find the face-adjacent neighbors of a chunk, whose meshes
/// depend on the blocks just across the shared face.
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Face6 {
    /// Negative X; the face whose normal vector is `(-1, 0, 0)`.
    NX = 1,
    /// Negative Y; the face whose normal vector is `(0, -1, 0)`; downward.
    NY = 2,
    /// Negative Z; the face whose normal vector is `(0, 0, -1)`.
    NZ = 3,
    /// Positive X; the face whose normal vector is `(1, 0, 0)`.
    PX = 4,
    /// Positive Y; the face whose normal vector is `(0, 1, 0)`; upward.
    PY = 5,
    /// Positive Z; the face whose normal vector is `(0, 0, 1)`.
    PZ = 6,
}

impl Face6 {
    /// All the values of [`Face6`].
    pub const ALL: [Face6; 6] = [
        Face6::NX,
        Face6::NY,
        Face6::NZ,
        Face6::PX,
        Face6::PY,
        Face6::PZ,
    ];

    /// Returns the opposite face (maps [`PX`](Self::PX) to [`NX`](Self::NX) and so on).
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Face6 {
        match self {
            Face6::NX => Face6::PX,
            Face6::NY => Face6::PY,
            Face6::NZ => Face6::PZ,
            Face6::PX => Face6::NX,
            Face6::PY => Face6::NY,
            Face6::PZ => Face6::NZ,
        }
    }

    /// Returns the vector normal to this face, of length 1.
    #[inline]
    pub const fn normal_vector(self) -> GridVector {
        let (x, y, z): (GridCoordinate, GridCoordinate, GridCoordinate) = match self {
            Face6::NX => (-1, 0, 0),
            Face6::NY => (0, -1, 0),
            Face6::NZ => (0, 0, -1),
            Face6::PX => (1, 0, 0),
            Face6::PY => (0, 1, 0),
            Face6::PZ => (0, 0, 1),
        };
        GridVector::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_normals_cancel() {
        for face in Face6::ALL {
            assert_eq!(
                face.normal_vector() + face.opposite().normal_vector(),
                GridVector::zero(),
                "{face:?}"
            );
        }
    }
}
