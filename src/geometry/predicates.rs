//! Geometric predicate results and numeric constants shared by the mesh.
//!
//! The triangulation follows a two-tier scheme: every predicate first answers from
//! plain `f64` arithmetic and only when the value lands inside a tolerance band is
//! the answer recomputed through [`Rational`](super::rational::Rational) /
//! [`ExactVector`](super::exact_vector::ExactVector).

use nalgebra::Vector3;

use super::exact_vector::ExactVector;
use super::rational::{Rational, RationalError};

// =============================================================================
// TOLERANCES
// =============================================================================

/// Magnitude below which a [`Rational`] reports zero.
pub const RATIONAL_ZERO_TOLERANCE: f64 = 1e-10;

/// Plane and circle bands are `|n|² · PLANE_TOLERANCE_FACTOR` and
/// `r² · PLANE_TOLERANCE_FACTOR` respectively.
pub const PLANE_TOLERANCE_FACTOR: f64 = 1e-9;

/// Relative band used when comparing signed Delaunay distances during
/// retriangulation.
pub const SD_DISTANCE_TOLERANCE_FACTOR: f64 = 1e-7;

/// Relative rounding error assumed for every floating operation in the
/// circumsphere error bound.
pub const RELATIVE_ERROR: f64 = 1e-15;

/// Tolerance a freshly constructed tetrahedron carries before its first
/// circumsphere computation.
pub const INITIAL_SPHERE_TOLERANCE: f64 = 1e-7;

/// The per-pass checking index wraps at this value.
pub const CHECKING_INDEX_WRAP: i64 = 2_000_000_000;

// =============================================================================
// PREDICATE RESULTS
// =============================================================================

/// Represents the position of a point relative to a circumsphere or circumcircle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is on the boundary of the circumsphere (within numerical tolerance)
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl InSphere {
    /// Maps `-1`, `0`, `1` (or any negative / positive value) to a result.
    #[inline]
    #[must_use]
    pub const fn from_sign(sign: i32) -> Self {
        if sign > 0 {
            Self::INSIDE
        } else if sign < 0 {
            Self::OUTSIDE
        } else {
            Self::BOUNDARY
        }
    }

    /// `1` for inside, `0` on the boundary, `-1` outside.
    #[inline]
    #[must_use]
    pub const fn sign(self) -> i32 {
        match self {
            Self::OUTSIDE => -1,
            Self::BOUNDARY => 0,
            Self::INSIDE => 1,
        }
    }

    /// Strictly inside.
    #[inline]
    #[must_use]
    pub const fn is_inside(self) -> bool {
        matches!(self, Self::INSIDE)
    }

    /// Inside or on the boundary.
    #[inline]
    #[must_use]
    pub const fn is_inside_or_boundary(self) -> bool {
        !matches!(self, Self::OUTSIDE)
    }
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Relative orientation of two points with respect to a plane, or of a point with
/// respect to a plane's upper side.
///
/// `POSITIVE` means "same side" (or "upper side"), `NEGATIVE` means "opposite
/// sides" (or "lower side"), `DEGENERATE` means at least one point lies in the
/// plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// The points lie on opposite sides
    NEGATIVE,
    /// At least one point lies on the plane
    DEGENERATE,
    /// The points lie on the same side
    POSITIVE,
}

impl Orientation {
    /// Maps the sign of `sign` to an orientation.
    #[inline]
    #[must_use]
    pub const fn from_sign(sign: i32) -> Self {
        if sign > 0 {
            Self::POSITIVE
        } else if sign < 0 {
            Self::NEGATIVE
        } else {
            Self::DEGENERATE
        }
    }

    /// `1`, `0` or `-1`.
    #[inline]
    #[must_use]
    pub const fn sign(self) -> i32 {
        match self {
            Self::NEGATIVE => -1,
            Self::DEGENERATE => 0,
            Self::POSITIVE => 1,
        }
    }

    /// Swaps positive and negative.
    #[inline]
    #[must_use]
    pub const fn negated(self) -> Self {
        match self {
            Self::NEGATIVE => Self::POSITIVE,
            Self::DEGENERATE => Self::DEGENERATE,
            Self::POSITIVE => Self::NEGATIVE,
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

// =============================================================================
// PLANE INTERSECTIONS
// =============================================================================

/// Intersection point of the three planes `normals[i] · x = offsets[i]`.
///
/// Returns a vector with every component set to `f64::MAX` when the normals are
/// linearly dependent.
#[must_use]
pub fn three_plane_intersection(normals: &[Vector3<f64>; 3], offsets: [f64; 3]) -> Vector3<f64> {
    let det = normals[0].dot(&normals[1].cross(&normals[2]));
    if det == 0.0 {
        return Vector3::repeat(f64::MAX);
    }
    let sum = normals[1].cross(&normals[2]) * offsets[0]
        + normals[2].cross(&normals[0]) * offsets[1]
        + normals[0].cross(&normals[1]) * offsets[2];
    sum / det
}

/// Exact counterpart of [`three_plane_intersection`].
///
/// # Errors
///
/// Propagates [`RationalError`] from the final division; a zero determinant does
/// not error and yields `f64::MAX` components instead.
pub fn three_plane_intersection_exact(
    normals: &[ExactVector; 3],
    offsets: [Rational; 3],
) -> Result<ExactVector, RationalError> {
    let det = ExactVector::det(normals);
    if det.is_zero() {
        return Ok(ExactVector::new([Rational::new(f64::MAX); 3]));
    }
    let mut sum = normals[1].cross(&normals[2]).multiply(offsets[0]);
    sum.increase_by(&normals[2].cross(&normals[0]).multiply(offsets[1]))
        .increase_by(&normals[0].cross(&normals[1]).multiply(offsets[2]));
    sum.divide(det)
}

/// Exact circumcenter of the triangle `points`, given a normal of its plane.
///
/// # Errors
///
/// Propagates [`RationalError`] from the plane intersection.
pub fn circum_center_exact(
    points: &[ExactVector; 3],
    normal: &ExactVector,
) -> Result<ExactVector, RationalError> {
    let a = points[0];
    let two = Rational::new(2.0);
    let n = [points[1].subtract(&a), points[2].subtract(&a), *normal];
    let offsets = [
        points[1].add(&a).dot(&n[0]).divide(two)?,
        points[2].add(&a).dot(&n[1]).divide(two)?,
        a.dot(&n[2]),
    ];
    three_plane_intersection_exact(&n, offsets)
}

/// Exact normal `(p1 - p0) × (p2 - p0)`.
#[must_use]
pub fn exact_normal(points: &[ExactVector; 3]) -> ExactVector {
    points[1]
        .subtract(&points[0])
        .cross(&points[2].subtract(&points[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_three_plane_intersection_axes() {
        let normals = [Vector3::x(), Vector3::y(), Vector3::z()];
        let p = three_plane_intersection(&normals, [1.0, 2.0, 3.0]);
        assert_relative_eq!(p, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_three_plane_intersection_parallel() {
        let normals = [Vector3::x(), Vector3::x(), Vector3::z()];
        let p = three_plane_intersection(&normals, [1.0, 2.0, 3.0]);
        assert_eq!(p, Vector3::repeat(f64::MAX));

        let exact = [Vector3::x(), Vector3::x(), Vector3::z()].map(ExactVector::from);
        let q = three_plane_intersection_exact(&exact, [Rational::new(1.0); 3]).unwrap();
        assert_eq!(q.to_vector(), Vector3::repeat(f64::MAX));
    }

    #[test]
    fn test_exact_circumcenter_of_right_triangle() {
        let pts = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
        ]
        .map(ExactVector::from);
        let c = circum_center_exact(&pts, &exact_normal(&pts)).unwrap();
        assert_relative_eq!(c.to_vector(), Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_sign_round_trips() {
        for s in [-1, 0, 1] {
            assert_eq!(InSphere::from_sign(s).sign(), s);
            assert_eq!(Orientation::from_sign(s).sign(), s);
        }
        assert_eq!(Orientation::POSITIVE.negated(), Orientation::NEGATIVE);
        assert_eq!(format!("{}", InSphere::BOUNDARY), "BOUNDARY");
    }

    #[test]
    fn test_insphere_containment_helpers() {
        assert!(InSphere::INSIDE.is_inside());
        assert!(!InSphere::BOUNDARY.is_inside());
        assert!(InSphere::BOUNDARY.is_inside_or_boundary());
        assert!(!InSphere::OUTSIDE.is_inside_or_boundary());
    }
}
