//! Plane-bounded view volumes for culling chunks which cannot be seen.

use crate::math::{Aab, FreeCoordinate, FreePoint, FreeVector};

/// A plane in 3D space, represented as the set of points `p` where
/// `normal · p + distance == 0`.
///
/// Points with positive signed distance are considered “inside”.
#[derive(Clone, Copy, Debug, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct Plane {
    /// Unit normal vector pointing toward the inside half-space.
    pub normal: FreeVector,
    /// Offset of the plane along its normal.
    pub distance: FreeCoordinate,
}

impl Plane {
    /// A plane through `point` with the given (not necessarily normalized) normal.
    #[inline]
    pub fn through_point(point: FreePoint, normal: FreeVector) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: -normal.dot(point.to_vector()),
        }
    }

    /// Signed distance from the plane to `point`; positive on the inside.
    #[inline]
    pub fn signed_distance(&self, point: FreePoint) -> FreeCoordinate {
        self.normal.dot(point.to_vector()) + self.distance
    }
}

/// A convex view volume bounded by six planes (left, right, bottom, top, near, far).
#[derive(Clone, Debug, PartialEq)]
pub struct ViewFrustum {
    planes: [Plane; 6],
}

impl ViewFrustum {
    /// A frustum which contains everything; culling with it has no effect.
    pub const EVERYTHING: Self = {
        const OPEN: Plane = Plane {
            normal: FreeVector::new(0.0, 0.0, 0.0),
            distance: 0.0,
        };
        Self { planes: [OPEN; 6] }
    };

    /// Constructs a frustum from explicit planes whose normals point inward.
    #[inline]
    pub const fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Constructs a symmetric perspective frustum.
    ///
    /// `fov_y` is the full vertical field of view in degrees, and `aspect` is width
    /// divided by height. `forward` and `up` need not be normalized, but must not be
    /// parallel.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn perspective(
        eye: FreePoint,
        forward: FreeVector,
        up: FreeVector,
        fov_y: FreeCoordinate,
        aspect: FreeCoordinate,
        near: FreeCoordinate,
        far: FreeCoordinate,
    ) -> Self {
        let f = forward.normalize();
        let r = f.cross(up).normalize();
        let u = r.cross(f);
        let half_v = (fov_y.to_radians() / 2.0).tan();
        let half_h = half_v * aspect;

        let left_edge = f - r * half_h;
        let right_edge = f + r * half_h;
        let bottom_edge = f - u * half_v;
        let top_edge = f + u * half_v;

        Self {
            planes: [
                Plane::through_point(eye, left_edge.cross(u)),
                Plane::through_point(eye, u.cross(right_edge)),
                Plane::through_point(eye, r.cross(bottom_edge)),
                Plane::through_point(eye, top_edge.cross(r)),
                Plane::through_point(eye + f * near, f),
                Plane::through_point(eye + f * far, -f),
            ],
        }
    }

    /// Constructs a frustum from the rows of a combined view-projection matrix, in the
    /// column-vector convention (`clip = M * v`) with clip-space depth in `-w..=w`.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn from_matrix_rows(m: [[FreeCoordinate; 4]; 4]) -> Self {
        let combine = |sign: FreeCoordinate, row: usize| {
            let [a, b, c, d] = core::array::from_fn(|i| m[3][i] + sign * m[row][i]);
            let normal = FreeVector::new(a, b, c);
            let length = normal.length();
            if length == 0.0 {
                return Plane {
                    normal,
                    distance: d,
                };
            }
            Plane {
                normal: normal / length,
                distance: d / length,
            }
        };
        Self {
            planes: [
                combine(1.0, 0),
                combine(-1.0, 0),
                combine(1.0, 1),
                combine(-1.0, 1),
                combine(1.0, 2),
                combine(-1.0, 2),
            ],
        }
    }

    /// The bounding planes.
    #[inline]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// Returns whether the point is inside or on the boundary of the frustum.
    #[inline]
    pub fn contains_point(&self, point: FreePoint) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }

    /// Returns whether any part of the box may be inside the frustum.
    ///
    /// This is conservative: it may return `true` for boxes near the frustum's edges
    /// which are actually outside, but never returns `false` for a visible box.
    #[inline]
    pub fn aab_in_view(&self, aab: Aab) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(aab.leading_corner(plane.normal)) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{ChunkPos, GridAab};
    use euclid::{point3, vec3};

    fn looking_along_positive_z() -> ViewFrustum {
        ViewFrustum::perspective(
            point3(8.0, 8.0, 8.0),
            vec3(0.0, 0.0, 1.0),
            vec3(0.0, 1.0, 0.0),
            90.0,
            1.0,
            0.1,
            200.0,
        )
    }

    #[test]
    fn perspective_culls_behind() {
        let frustum = looking_along_positive_z();
        assert!(frustum.contains_point(point3(8.0, 8.0, 50.0)));
        assert!(!frustum.contains_point(point3(8.0, 8.0, -50.0)));
        assert!(frustum.aab_in_view(ChunkPos::new(0, 0, 2).bounds().to_free()));
        assert!(!frustum.aab_in_view(ChunkPos::new(0, 0, -3).bounds().to_free()));
        // far to the side, outside the 90° cone
        assert!(!frustum.aab_in_view(ChunkPos::new(-6, 0, 1).bounds().to_free()));
    }

    #[test]
    fn box_containing_eye_is_visible() {
        let frustum = looking_along_positive_z();
        assert!(frustum.aab_in_view(GridAab::from_lower_upper([0, 0, 0], [16, 16, 16]).to_free()));
    }

    #[test]
    fn everything_contains_everything() {
        let far_away = Aab::new(-1e9, -1e9 + 1.0, 5.0, 6.0, 1e9, 1e9 + 1.0);
        assert!(ViewFrustum::EVERYTHING.aab_in_view(far_away));
    }

    #[test]
    fn identity_matrix_is_clip_cube() {
        let frustum = ViewFrustum::from_matrix_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert!(frustum.contains_point(point3(0.5, -0.5, 0.9)));
        assert!(!frustum.contains_point(point3(1.5, 0.0, 0.0)));
    }
}
