//! Axis-aligned integer-coordinate box volumes ([`GridAab`]).

use core::fmt;
use core::ops::Range;

use crate::math::{Aab, Cube, FreeCoordinate, GridCoordinate, GridPoint, GridVector};

/// An axis-aligned box with integer coordinates, whose volume is no less than zero.
///
/// Placement regions and dirty regions are expressed with this type; the pipeline
/// converts them to the set of chunks they overlap.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridAab {
    lower_bounds: GridPoint,
    /// Constructor checks ensure this is not smaller than `lower_bounds`.
    upper_bounds: GridPoint,
}

impl GridAab {
    /// Box of zero size at `[0, 0, 0]`.
    ///
    /// Use this box as the canonical placeholder “nothing” value when it is necessary to
    /// have *some* box.
    pub const ORIGIN_EMPTY: GridAab = GridAab {
        lower_bounds: GridPoint::new(0, 0, 0),
        upper_bounds: GridPoint::new(0, 0, 0),
    };

    /// Constructs a [`GridAab`] from inclusive lower bounds and exclusive upper bounds.
    ///
    /// For example, if on one axis the lower bound is 5 and the upper bound is 10,
    /// then the positions where blocks can exist are numbered 5 through 9 (inclusive).
    ///
    /// Returns [`Err`] if any of the `upper_bounds` are less than the `lower_bounds`.
    #[allow(clippy::missing_inline_in_public_items, reason = "is generic already")]
    pub fn checked_from_lower_upper(
        lower_bounds: impl Into<GridPoint>,
        upper_bounds: impl Into<GridPoint>,
    ) -> Result<Self, GridOverflowError> {
        let lower_bounds = lower_bounds.into();
        let upper_bounds = upper_bounds.into();
        if upper_bounds.x < lower_bounds.x
            || upper_bounds.y < lower_bounds.y
            || upper_bounds.z < lower_bounds.z
        {
            return Err(GridOverflowError {
                lower_bounds,
                upper_bounds,
            });
        }
        Ok(GridAab {
            lower_bounds,
            upper_bounds,
        })
    }

    /// Constructs a [`GridAab`] from inclusive lower bounds and exclusive upper bounds.
    ///
    /// Panics if any of the `upper_bounds` are less than the `lower_bounds`.
    #[track_caller]
    #[allow(clippy::missing_inline_in_public_items, reason = "is generic already")]
    pub fn from_lower_upper(
        lower_bounds: impl Into<GridPoint>,
        upper_bounds: impl Into<GridPoint>,
    ) -> GridAab {
        match Self::checked_from_lower_upper(lower_bounds, upper_bounds) {
            Ok(aab) => aab,
            Err(e) => panic!("GridAab::from_lower_upper: {e}"),
        }
    }

    /// Constructs a [`GridAab`] from coordinate lower bounds and sizes.
    ///
    /// Panics if the sizes are negative or the upper bounds overflow.
    #[track_caller]
    #[allow(clippy::missing_inline_in_public_items, reason = "is generic already")]
    pub fn from_lower_size(lower_bounds: impl Into<GridPoint>, sizes: impl Into<GridVector>) -> Self {
        let lower_bounds = lower_bounds.into();
        let sizes = sizes.into();
        let upper_bounds = GridPoint::new(
            lower_bounds.x.checked_add(sizes.x).expect("GridAab::from_lower_size overflow"),
            lower_bounds.y.checked_add(sizes.y).expect("GridAab::from_lower_size overflow"),
            lower_bounds.z.checked_add(sizes.z).expect("GridAab::from_lower_size overflow"),
        );
        Self::from_lower_upper(lower_bounds, upper_bounds)
    }

    /// Constructs the smallest box containing both corner cubes, in either order.
    ///
    /// This is how a pair of user-picked corners (both inclusive) becomes a box.
    #[inline]
    pub fn from_corner_cubes(a: Cube, b: Cube) -> Self {
        let lower = GridPoint::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z));
        let upper = GridPoint::new(
            a.x.max(b.x).saturating_add(1),
            a.y.max(b.y).saturating_add(1),
            a.z.max(b.z).saturating_add(1),
        );
        GridAab {
            lower_bounds: lower,
            upper_bounds: upper,
        }
    }

    /// Returns whether the box contains no cubes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower_bounds.x == self.upper_bounds.x
            || self.lower_bounds.y == self.upper_bounds.y
            || self.lower_bounds.z == self.upper_bounds.z
    }

    /// Inclusive lower bounds on cube coordinates.
    #[inline]
    pub fn lower_bounds(&self) -> GridPoint {
        self.lower_bounds
    }

    /// Exclusive upper bounds on cube coordinates.
    #[inline]
    pub fn upper_bounds(&self) -> GridPoint {
        self.upper_bounds
    }

    /// The range of X coordinates for cubes within this box.
    #[inline]
    pub fn x_range(&self) -> Range<GridCoordinate> {
        self.lower_bounds.x..self.upper_bounds.x
    }

    /// The range of Y coordinates for cubes within this box.
    #[inline]
    pub fn y_range(&self) -> Range<GridCoordinate> {
        self.lower_bounds.y..self.upper_bounds.y
    }

    /// The range of Z coordinates for cubes within this box.
    #[inline]
    pub fn z_range(&self) -> Range<GridCoordinate> {
        self.lower_bounds.z..self.upper_bounds.z
    }

    /// Iterate over all cubes that this contains, in X-major order.
    #[inline]
    pub fn interior_iter(self) -> impl Iterator<Item = Cube> + Clone {
        let ys = self.y_range();
        let zs = self.z_range();
        self.x_range().flat_map(move |x| {
            let zs = zs.clone();
            ys.clone()
                .flat_map(move |y| zs.clone().map(move |z| Cube::new(x, y, z)))
        })
    }

    /// Returns whether the box includes the given cube.
    #[inline]
    pub fn contains_cube(&self, cube: Cube) -> bool {
        self.x_range().contains(&cube.x)
            && self.y_range().contains(&cube.y)
            && self.z_range().contains(&cube.z)
    }

    /// Returns the intersection of `self` and `other`, or [`None`] if they share no cubes.
    #[inline]
    pub fn intersection_cubes(self, other: GridAab) -> Option<GridAab> {
        let lower = self.lower_bounds.max(other.lower_bounds);
        let upper = self.upper_bounds.min(other.upper_bounds);
        if lower.x >= upper.x || lower.y >= upper.y || lower.z >= upper.z {
            None
        } else {
            Some(GridAab {
                lower_bounds: lower,
                upper_bounds: upper,
            })
        }
    }

    /// Scales the box down by the given factor, rounding outward.
    ///
    /// For example, a box of cubes divided by a chunk size yields the box of chunk
    /// positions the original overlaps.
    ///
    /// Panics if `divisor <= 0`.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn divide(self, divisor: GridCoordinate) -> Self {
        assert!(divisor > 0, "GridAab::divide: divisor must be > 0, not {divisor}");
        let floor = |c: GridCoordinate| c.div_euclid(divisor);
        let ceil = |c: GridCoordinate| {
            let q = c.div_euclid(divisor);
            if c.rem_euclid(divisor) == 0 { q } else { q + 1 }
        };
        let GridPoint { x: lx, y: ly, z: lz, .. } = self.lower_bounds;
        let GridPoint { x: ux, y: uy, z: uz, .. } = self.upper_bounds;
        GridAab {
            lower_bounds: GridPoint::new(floor(lx), floor(ly), floor(lz)),
            upper_bounds: GridPoint::new(ceil(ux), ceil(uy), ceil(uz)),
        }
    }

    /// Converts to the floating-point box covering the same volume.
    #[inline]
    pub fn to_free(self) -> Aab {
        Aab::from_lower_upper(
            self.lower_bounds.cast::<FreeCoordinate>(),
            self.upper_bounds.cast::<FreeCoordinate>(),
        )
    }
}

impl fmt::Debug for GridAab {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("GridAab")
            .field(&self.x_range())
            .field(&self.y_range())
            .field(&self.z_range())
            .finish()
    }
}

/// box bounds are inverted: lower {lower_bounds:?} upper {upper_bounds:?}
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
pub struct GridOverflowError {
    lower_bounds: GridPoint,
    upper_bounds: GridPoint,
}

impl core::error::Error for GridOverflowError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn divide_rounds_outward() {
        assert_eq!(
            GridAab::from_lower_upper([-1, 0, 15], [16, 16, 17]).divide(16),
            GridAab::from_lower_upper([-1, 0, 0], [1, 1, 2])
        );
    }

    #[test]
    fn from_corner_cubes_is_order_independent() {
        let a = Cube::new(5, -3, 2);
        let b = Cube::new(-1, 4, 2);
        assert_eq!(
            GridAab::from_corner_cubes(a, b),
            GridAab::from_corner_cubes(b, a)
        );
        assert_eq!(
            GridAab::from_corner_cubes(a, b),
            GridAab::from_lower_upper([-1, -3, 2], [6, 5, 3])
        );
    }

    #[test]
    fn intersection() {
        let a = GridAab::from_lower_upper([0, 0, 0], [10, 10, 10]);
        let b = GridAab::from_lower_upper([5, -5, 9], [20, 5, 30]);
        assert_eq!(
            a.intersection_cubes(b),
            Some(GridAab::from_lower_upper([5, 0, 9], [10, 5, 10]))
        );
        assert_eq!(
            a.intersection_cubes(GridAab::from_lower_upper([10, 0, 0], [11, 1, 1])),
            None
        );
    }

    #[test]
    fn interior_iter_count() {
        let aab = GridAab::from_lower_upper([0, 0, 0], [2, 3, 4]);
        assert_eq!(aab.interior_iter().count(), 24);
        assert!(aab.interior_iter().all(|cube| aab.contains_cube(cube)));
    }

    #[test]
    fn inverted_is_error() {
        assert!(GridAab::checked_from_lower_upper([1, 0, 0], [0, 1, 1]).is_err());
    }
}
