//! Grouping cubes into fixed-size cubical chunks.

use core::fmt;

use crate::math::{Cube, Face6, FreeCoordinate, FreePoint, GridAab, GridCoordinate, GridPoint};

/// Edge length, in cubes, of every chunk.
pub const CHUNK_SIZE: GridCoordinate = 16;

/// [`CHUNK_SIZE`] as a floating-point value.
pub const CHUNK_SIZE_FREE: FreeCoordinate = CHUNK_SIZE as FreeCoordinate;

/// Type to distinguish chunk coordinates from cube coordinates.
///
/// Chunk math is generally just like cube math (hence the type of the field), but we
/// don't want to confuse the two and forget to multiply or divide.
/// A `ChunkPos([x, y, z])` identifies the chunk which contains the cubes with `x` coordinates
/// in the half-open range `x * CHUNK_SIZE..(x + 1) * CHUNK_SIZE`, and similarly for the
/// `y` and `z` axes.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[expect(clippy::exhaustive_structs)]
pub struct ChunkPos(pub Cube);

impl fmt::Debug for ChunkPos {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(Cube { x, y, z }) = *self;
        write!(f, "ChunkPos({x}, {y}, {z})")
    }
}

impl fmt::Display for ChunkPos {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(Cube { x, y, z }) = *self;
        write!(f, "[{x}, {y}, {z}]")
    }
}

impl ChunkPos {
    /// Construct a [`ChunkPos`] from chunk coordinates
    /// (i.e. successive numbers indicate adjacent chunks).
    #[inline]
    pub const fn new(x: GridCoordinate, y: GridCoordinate, z: GridCoordinate) -> Self {
        Self(Cube::new(x, y, z))
    }

    /// Returns the bounds of this chunk as a [`GridAab`].
    ///
    /// Panics if the chunk's cubes are outside the range of [`GridCoordinate`].
    #[inline]
    #[track_caller]
    pub fn bounds(self) -> GridAab {
        GridAab::from_lower_size(self.lower_corner(), [CHUNK_SIZE, CHUNK_SIZE, CHUNK_SIZE])
    }

    /// Returns the cube coordinates of the chunk's most negative corner.
    #[inline]
    pub fn lower_corner(self) -> GridPoint {
        let Cube { x, y, z } = self.0;
        GridPoint::new(x * CHUNK_SIZE, y * CHUNK_SIZE, z * CHUNK_SIZE)
    }

    /// Returns the center point of the chunk volume.
    #[inline]
    pub fn center(self) -> FreePoint {
        let half = CHUNK_SIZE_FREE / 2.0;
        self.lower_corner().cast::<FreeCoordinate>() + euclid::vec3(half, half, half)
    }

    /// The horizontal column this chunk belongs to, which is the granularity at which
    /// source data is loaded.
    #[inline]
    pub const fn column(self) -> [GridCoordinate; 2] {
        [self.0.x, self.0.z]
    }

    /// Returns the chunk sharing the given face of this one, or [`None`] on overflow.
    #[inline]
    pub fn adjacent(self, face: Face6) -> Option<Self> {
        Some(Self(self.0.checked_add(face.normal_vector())?))
    }

    /// Squared Euclidean distance between the two chunk positions, in units of whole
    /// chunks.
    #[inline]
    pub fn distance_squared(self, other: Self) -> i64 {
        let d = self.0 - other.0;
        i64::from(d.x).pow(2) + i64::from(d.y).pow(2) + i64::from(d.z).pow(2)
    }

    /// The larger of the X and Z coordinate differences between two chunks.
    ///
    /// Render distance is measured this way: it forms a square of columns around the
    /// viewer, not a sphere.
    #[inline]
    pub fn horizontal_chebyshev_distance(self, other: Self) -> GridCoordinate {
        let d = self.0 - other.0;
        d.x.abs().max(d.z.abs())
    }

    /// Squared distance from the given point to the center of this chunk.
    #[inline]
    pub fn center_distance_squared(self, point: FreePoint) -> FreeCoordinate {
        (self.center() - point).square_length()
    }
}

/// Scale an arbitrary point to obtain the containing chunk.
///
/// Returns [`None`] if the floating-point input overflows the integer range of the output.
#[inline]
pub fn point_to_chunk(point: FreePoint) -> Option<ChunkPos> {
    Some(ChunkPos(Cube::containing(FreePoint::new(
        point.x.div_euclid(CHUNK_SIZE_FREE),
        point.y.div_euclid(CHUNK_SIZE_FREE),
        point.z.div_euclid(CHUNK_SIZE_FREE),
    ))?))
}

/// Returns the box of chunk positions which overlap the given box of cubes.
#[inline]
pub fn chunks_overlapping(region: GridAab) -> GridAab {
    region.divide(CHUNK_SIZE)
}
