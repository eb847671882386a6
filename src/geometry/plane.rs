//! Plane equation with a tolerance band and exact side tests.

use nalgebra::Vector3;

use super::exact_vector::ExactVector;
use super::predicates::{Orientation, PLANE_TOLERANCE_FACTOR, exact_normal};
use super::rational::Rational;

/// A plane `normal · x = offset`.
///
/// `tolerance` is `|normal|² · PLANE_TOLERANCE_FACTOR`; dot products within
/// `offset ± tolerance` are considered undecided by the floating path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unnormalized normal vector.
    pub normal: Vector3<f64>,
    /// `normal · p` for any point `p` of the plane.
    pub offset: f64,
    /// Width of the undecided band around `offset`.
    pub tolerance: f64,
}

impl Plane {
    /// Plane through three points with normal `(p1 - p0) × (p2 - p0)`.
    #[must_use]
    pub fn through(points: &[Vector3<f64>; 3]) -> Self {
        let normal = (points[1] - points[0]).cross(&(points[2] - points[0]));
        Self {
            normal,
            offset: normal.dot(&points[0]),
            tolerance: normal.norm_squared() * PLANE_TOLERANCE_FACTOR,
        }
    }

    /// Signed side of a single point, or `None` inside the tolerance band.
    #[inline]
    #[must_use]
    pub fn fast_side(&self, point: &Vector3<f64>) -> Option<Orientation> {
        let dot = point.dot(&self.normal);
        if dot > self.offset + self.tolerance {
            Some(Orientation::POSITIVE)
        } else if dot < self.offset - self.tolerance {
            Some(Orientation::NEGATIVE)
        } else {
            None
        }
    }

    /// Whether two points lie on the same side, answered from floating
    /// arithmetic; `None` when either point is inside the band.
    #[must_use]
    pub fn fast_orientation(&self, p1: &Vector3<f64>, p2: &Vector3<f64>) -> Option<Orientation> {
        let s1 = self.fast_side(p1)?;
        let s2 = self.fast_side(p2)?;
        Some(Orientation::from_sign(s1.sign() * s2.sign()))
    }

    /// Exact two-point orientation against the plane through `points`.
    ///
    /// The normal and offset are recomputed from the points themselves, so the
    /// answer does not depend on any cached floating plane.
    #[must_use]
    pub fn exact_orientation(
        points: &[Vector3<f64>; 3],
        p1: &Vector3<f64>,
        p2: &Vector3<f64>,
    ) -> Orientation {
        let exact = points.map(ExactVector::from);
        let normal = exact_normal(&exact);
        let offset = normal.dot(&exact[0]);
        let s1 = normal.dot(&ExactVector::from(p1)).signum_against(offset);
        let s2 = normal.dot(&ExactVector::from(p2)).signum_against(offset);
        Orientation::from_sign(s1 * s2)
    }

    /// Exact comparison of `point` against the plane through `points`:
    /// `Greater` when `point` lies on the side the normal points at.
    #[must_use]
    pub fn exact_side(points: &[Vector3<f64>; 3], point: &Vector3<f64>) -> Orientation {
        let exact = points.map(ExactVector::from);
        let normal = exact_normal(&exact);
        let offset: Rational = normal.dot(&exact[0]);
        Orientation::from_sign(normal.dot(&ExactVector::from(point)).signum_against(offset))
    }

    /// Side of `point` against the plane through `points`, judged on the
    /// configuration translated to `points[0]` and scaled to unit extent.
    ///
    /// Unlike [`exact_side`](Self::exact_side), whose zero test is absolute,
    /// the answer does not change when all four points are scaled together.
    /// Coincident points give `DEGENERATE`.
    #[must_use]
    pub fn simplex_side(points: &[Vector3<f64>; 3], point: &Vector3<f64>) -> Orientation {
        let origin = points[0];
        let extent = [points[1], points[2], *point]
            .iter()
            .map(|p| (p - origin).amax())
            .fold(0.0, f64::max);
        if extent <= 0.0 || !extent.is_finite() {
            return Orientation::DEGENERATE;
        }
        let unit = |p: &Vector3<f64>| (p - origin) / extent;
        let scaled = [Vector3::zeros(), unit(&points[1]), unit(&points[2])];
        let target = unit(point);
        Self::through(&scaled)
            .fast_side(&target)
            .unwrap_or_else(|| Self::exact_side(&scaled, &target))
    }
}
