use core::fmt;

use crate::math::{FreeCoordinate, FreePoint, FreeVector};

/// Axis-Aligned Box data type.
///
/// Note that this has continuous coordinates, and a discrete analogue exists as
/// [`GridAab`](crate::math::GridAab).
#[derive(Copy, Clone, PartialEq)]
pub struct Aab {
    lower_bounds: FreePoint,
    upper_bounds: FreePoint,
}

impl Aab {
    /// The [`Aab`] of zero size at the origin.
    pub const ZERO: Aab = Aab {
        lower_bounds: FreePoint::new(0., 0., 0.),
        upper_bounds: FreePoint::new(0., 0., 0.),
    };

    /// Constructs an [`Aab`] from individual coordinates.
    #[inline]
    #[track_caller]
    pub fn new(
        lx: FreeCoordinate,
        hx: FreeCoordinate,
        ly: FreeCoordinate,
        hy: FreeCoordinate,
        lz: FreeCoordinate,
        hz: FreeCoordinate,
    ) -> Self {
        Self::from_lower_upper(FreePoint::new(lx, ly, lz), FreePoint::new(hx, hy, hz))
    }

    /// Constructs an [`Aab`] from most-negative and most-positive corner points.
    ///
    /// Panics if the points are not in the proper order or if they are NaN.
    #[inline]
    #[track_caller]
    pub fn from_lower_upper(
        lower_bounds: impl Into<FreePoint>,
        upper_bounds: impl Into<FreePoint>,
    ) -> Self {
        let lower_bounds = lower_bounds.into();
        let upper_bounds = upper_bounds.into();
        match Self::checked_from_lower_upper(lower_bounds, upper_bounds) {
            Some(aab) => aab,
            None => panic!(
                "invalid AAB points that are misordered or NaN: \
                lower {lower_bounds:?} upper {upper_bounds:?}"
            ),
        }
    }

    /// Constructs an [`Aab`] from most-negative and most-positive corner points.
    ///
    /// Returns [`None`] if the points are not in the proper order or if they are NaN.
    #[inline]
    pub fn checked_from_lower_upper(
        lower_bounds: FreePoint,
        upper_bounds: FreePoint,
    ) -> Option<Self> {
        if lower_bounds.x <= upper_bounds.x
            && lower_bounds.y <= upper_bounds.y
            && lower_bounds.z <= upper_bounds.z
        {
            Some(Self {
                lower_bounds,
                upper_bounds,
            })
        } else {
            None
        }
    }

    /// Returns the center of this box.
    #[inline]
    pub fn center(&self) -> FreePoint {
        self.lower_bounds.lerp(self.upper_bounds, 0.5)
    }

    /// Returns whether this box includes the point, with the lower bound inclusive and the
    /// upper bound exclusive.
    #[inline]
    pub fn contains(&self, point: FreePoint) -> bool {
        (self.lower_bounds.x..self.upper_bounds.x).contains(&point.x)
            && (self.lower_bounds.y..self.upper_bounds.y).contains(&point.y)
            && (self.lower_bounds.z..self.upper_bounds.z).contains(&point.z)
    }

    /// Returns the corner of the box which is farthest along `direction`.
    ///
    /// This is the “positive vertex” used in plane-versus-box tests: if this corner is
    /// behind a plane with normal `direction`, the entire box is.
    #[inline]
    pub fn leading_corner(&self, direction: FreeVector) -> FreePoint {
        FreePoint::new(
            if direction.x >= 0.0 { self.upper_bounds.x } else { self.lower_bounds.x },
            if direction.y >= 0.0 { self.upper_bounds.y } else { self.lower_bounds.y },
            if direction.z >= 0.0 { self.upper_bounds.z } else { self.lower_bounds.z },
        )
    }
}

impl fmt::Debug for Aab {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Aab {
            lower_bounds: l,
            upper_bounds: u,
        } = *self;
        fmt.debug_tuple("Aab")
            .field(&(l.x..=u.x))
            .field(&(l.y..=u.y))
            .field(&(l.z..=u.z))
            .finish()
    }
}
