use core::fmt;

use crate::math::{Aab, FreeCoordinate, FreePoint, FreeVector, GridCoordinate, GridPoint, GridVector};

/// “A cube”, in this documentation, is a unit cube whose corners' coordinates are integers.
/// This type identifies such a cube by the coordinates of its most negative corner.
///
/// Considered in continuous space, the ranges of coordinates a cube contains are
/// half-open intervals: lower inclusive and upper exclusive.
///
/// # Representation
///
/// This struct is guaranteed to be three `i32` without padding, and so may be reinterpreted
/// as any type of identical layout such as `[i32; 3]`.
#[derive(Clone, Copy, Eq, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs, clippy::exhaustive_structs)]
#[repr(C)]
pub struct Cube {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl core::hash::Hash for Cube {
    #[inline]
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        // Hashers work on 64-bit quantities, so pack two coordinates into one input.
        (u64::from(self.x.cast_unsigned()) ^ (u64::from(self.y.cast_unsigned()) << 32)).hash(state);
        self.z.hash(state);
    }
}

impl Cube {
    /// Equal to `Cube::new(0, 0, 0)`.
    ///
    /// Note that this is not a box _centered_ on the coordinate origin.
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    /// Construct `Cube { x, y, z }` from the given coordinates.
    #[inline]
    pub const fn new(x: GridCoordinate, y: GridCoordinate, z: GridCoordinate) -> Self {
        Self { x, y, z }
    }

    /// Convert a point in space to the unit cube that encloses it.
    ///
    /// If the point coordinates are outside of the numeric range of [`GridCoordinate`]
    /// (or NaN), returns [`None`].
    ///
    /// ```
    /// use chunkstream_base::math::{FreePoint, Cube};
    ///
    /// assert_eq!(Cube::containing(FreePoint::new(1.0, 1.5, -2.5)), Some(Cube::new(1, 1, -3)));
    /// ```
    #[inline]
    pub fn containing(point: FreePoint) -> Option<Self> {
        const MIN_INCLUSIVE: FreeCoordinate = GridCoordinate::MIN as FreeCoordinate;
        const MAX_EXCLUSIVE: FreeCoordinate = GridCoordinate::MAX as FreeCoordinate + 1.0;

        let FreePoint { x, y, z, .. } = point;

        // No short-circuiting because, assuming success is likely, all tests will need to run.
        if (MIN_INCLUSIVE <= x)
            & (MIN_INCLUSIVE <= y)
            & (MIN_INCLUSIVE <= z)
            & (x < MAX_EXCLUSIVE)
            & (y < MAX_EXCLUSIVE)
            & (z < MAX_EXCLUSIVE)
        {
            Some(Self {
                x: x.floor() as GridCoordinate,
                y: y.floor() as GridCoordinate,
                z: z.floor() as GridCoordinate,
            })
        } else {
            None
        }
    }

    /// Returns the corner of this cube with the most negative coordinates.
    #[inline]
    pub fn lower_bounds(self) -> GridPoint {
        self.into()
    }

    /// Returns the center of this cube.
    #[inline]
    pub fn center(self) -> FreePoint {
        let Self { x, y, z } = self;
        FreePoint::new(
            FreeCoordinate::from(x) + 0.5,
            FreeCoordinate::from(y) + 0.5,
            FreeCoordinate::from(z) + 0.5,
        )
    }

    /// Returns the bounding box in floating-point coordinates containing this cube.
    #[inline]
    pub fn aab(self) -> Aab {
        let lower = GridPoint::from(self).cast::<FreeCoordinate>();
        Aab::from_lower_upper(lower, lower + FreeVector::new(1.0, 1.0, 1.0))
    }

    /// Componentwise [`GridCoordinate::checked_add()`].
    #[must_use]
    #[inline]
    pub fn checked_add(self, v: GridVector) -> Option<Self> {
        Some(Self {
            x: self.x.checked_add(v.x)?,
            y: self.y.checked_add(v.y)?,
            z: self.z.checked_add(v.z)?,
        })
    }
}

impl fmt::Debug for Cube {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { x, y, z } = self;
        write!(f, "({x:+.3?}, {y:+.3?}, {z:+.3?})")
    }
}

impl From<Cube> for GridPoint {
    #[inline]
    fn from(Cube { x, y, z }: Cube) -> Self {
        GridPoint::new(x, y, z)
    }
}
impl From<GridPoint> for Cube {
    #[inline]
    fn from(GridPoint { x, y, z, .. }: GridPoint) -> Self {
        Self { x, y, z }
    }
}
impl From<[GridCoordinate; 3]> for Cube {
    #[inline]
    fn from([x, y, z]: [GridCoordinate; 3]) -> Self {
        Self { x, y, z }
    }
}

impl core::ops::Add<GridVector> for Cube {
    type Output = Self;
    #[inline]
    fn add(self, rhs: GridVector) -> Self::Output {
        Self::from(self.lower_bounds() + rhs)
    }
}
impl core::ops::Sub<Cube> for Cube {
    type Output = GridVector;
    #[inline]
    fn sub(self, rhs: Cube) -> Self::Output {
        self.lower_bounds() - rhs.lower_bounds()
    }
}
