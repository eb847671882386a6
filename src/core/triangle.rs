//! Triangles shared by at most two tetrahedra.
//!
//! A [`Triangle`] stores its three node slots and its two tetrahedron slots. Slot 0
//! of the nodes may be empty, in which case the triangle belongs to the convex
//! hull's "infinite" side: it is spanned by two real nodes and the point at
//! infinity and carries no plane.
//!
//! Geometric queries take the vertex positions explicitly; the triangle only
//! caches the plane equation and the circumcenter derived from them. Both caches
//! are cleared by [`Triangle::inform_about_node_movement`] and recomputed on
//! demand, so a stale cache can never be observed through the `&self` methods.

#![allow(clippy::similar_names)]

use nalgebra::Vector3;

use crate::core::triangulation::{NodeKey, TetrahedronKey};
use crate::geometry::exact_vector::ExactVector;
use crate::geometry::plane::Plane;
use crate::geometry::predicates::{
    InSphere, Orientation, PLANE_TOLERANCE_FACTOR, circum_center_exact, exact_normal,
    three_plane_intersection,
};
use crate::geometry::rational::{Rational, RationalError};

/// Positions of the three nodes of a finite triangle, in slot order.
pub type TrianglePoints = [Vector3<f64>; 3];

/// A triangle of the tetrahedral mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    nodes: [Option<NodeKey>; 3],
    tetrahedra: [Option<TetrahedronKey>; 2],
    plane: Option<Plane>,
    circum_center: Option<Vector3<f64>>,
    upper_side_positive: bool,
    connection_checked: i64,
}

impl Triangle {
    /// Creates an unattached triangle.
    ///
    /// A missing node given in slot 1 or 2 is moved to slot 0, so that
    /// [`is_infinite`](Self::is_infinite) only has to look at the first slot.
    #[must_use]
    pub fn new(a: Option<NodeKey>, b: Option<NodeKey>, c: Option<NodeKey>) -> Self {
        let nodes = match (a, b, c) {
            (a, None, c) => [None, a, c],
            (a, b, None) => [None, b, a],
            other => [other.0, other.1, other.2],
        };
        Self {
            nodes,
            tetrahedra: [None, None],
            plane: None,
            circum_center: None,
            upper_side_positive: true,
            connection_checked: -1,
        }
    }

    // =========================================================================
    // TOPOLOGY
    // =========================================================================

    /// The three node slots.
    #[inline]
    #[must_use]
    pub const fn nodes(&self) -> [Option<NodeKey>; 3] {
        self.nodes
    }

    /// The two tetrahedron slots.
    #[inline]
    #[must_use]
    pub const fn tetrahedra(&self) -> [Option<TetrahedronKey>; 2] {
        self.tetrahedra
    }

    /// Whether one of the nodes is the point at infinity.
    #[inline]
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.nodes[0].is_none()
    }

    /// The tetrahedron on the other side of `incident`.
    ///
    /// Passing `None` asks for the occupied slot of an open triangle. Returns
    /// `None` when `incident` is not attached to this triangle.
    #[must_use]
    pub fn opposite_tetrahedron(
        &self,
        incident: Option<TetrahedronKey>,
    ) -> Option<Option<TetrahedronKey>> {
        if self.tetrahedra[0] == incident {
            Some(self.tetrahedra[1])
        } else if self.tetrahedra[1] == incident {
            Some(self.tetrahedra[0])
        } else {
            None
        }
    }

    /// Attaches a tetrahedron to the first free slot and resets the checking
    /// generation.
    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        if self.tetrahedra[0].is_none() {
            self.tetrahedra[0] = Some(tetrahedron);
        } else {
            self.tetrahedra[1] = Some(tetrahedron);
        }
        self.connection_checked = -1;
    }

    /// Detaches `tetrahedron` if it is attached.
    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        if self.tetrahedra[0] == Some(tetrahedron) {
            self.tetrahedra[0] = None;
        } else if self.tetrahedra[1] == Some(tetrahedron) {
            self.tetrahedra[1] = None;
        }
    }

    /// No tetrahedron is attached.
    #[inline]
    #[must_use]
    pub const fn is_completely_open(&self) -> bool {
        self.tetrahedra[0].is_none() && self.tetrahedra[1].is_none()
    }

    /// Both slots are occupied.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.tetrahedra[0].is_some() && self.tetrahedra[1].is_some()
    }

    /// Exactly one slot is occupied.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.is_closed() && !self.is_completely_open()
    }

    /// Whether `tetrahedron` occupies one of the slots.
    #[inline]
    #[must_use]
    pub fn is_adjacent_to_tetrahedron(&self, tetrahedron: TetrahedronKey) -> bool {
        self.tetrahedra.contains(&Some(tetrahedron))
    }

    /// Whether `node` is one of the three nodes. `None` tests for infiniteness.
    #[inline]
    #[must_use]
    pub fn is_adjacent_to_node(&self, node: Option<NodeKey>) -> bool {
        self.nodes.contains(&node)
    }

    /// Whether `other` is spanned by the same three nodes.
    #[must_use]
    pub fn is_similar_to(&self, other: &Self) -> bool {
        other.nodes.iter().all(|n| self.is_adjacent_to_node(*n))
    }

    /// Returns `true` if the triangle was already stamped with `checking_index`,
    /// otherwise stamps it and returns `false`.
    pub(crate) fn was_checked_already(&mut self, checking_index: i64) -> bool {
        if self.connection_checked == checking_index {
            true
        } else {
            self.connection_checked = checking_index;
            false
        }
    }

    pub(crate) fn reset_checked(&mut self) {
        self.connection_checked = -1;
    }

    /// Clears the cached plane and circumcenter.
    pub(crate) fn inform_about_node_movement(&mut self) {
        self.plane = None;
        self.circum_center = None;
    }

    /// Whether the upper side is the side the plane normal points to.
    #[inline]
    #[must_use]
    pub const fn upper_side_positive(&self) -> bool {
        self.upper_side_positive
    }

    pub(crate) fn flip_upper_side(&mut self) {
        self.upper_side_positive = !self.upper_side_positive;
    }

    // =========================================================================
    // CACHED GEOMETRY
    // =========================================================================

    /// Plane through the triangle, from the cache when available.
    #[must_use]
    pub fn plane(&self, points: &TrianglePoints) -> Plane {
        self.plane.unwrap_or_else(|| Plane::through(points))
    }

    /// Circumcenter of the triangle, from the cache when available.
    ///
    /// Collinear points yield a vector of `f64::MAX` components.
    #[must_use]
    pub fn circum_center(&self, points: &TrianglePoints) -> Vector3<f64> {
        self.circum_center
            .unwrap_or_else(|| compute_circum_center(points))
    }

    /// Recomputes the plane equation if it is not cached.
    pub(crate) fn update_plane_equation_if_necessary(&mut self, points: &TrianglePoints) {
        if self.plane.is_none() {
            self.plane = Some(Plane::through(points));
        }
    }

    /// Recomputes the circumcenter if it is not cached.
    pub(crate) fn update_circum_center_if_necessary(&mut self, points: &TrianglePoints) {
        if self.circum_center.is_none() {
            self.circum_center = Some(compute_circum_center(points));
        }
    }

    // =========================================================================
    // PLANE PREDICATES
    // =========================================================================

    /// Whether `p1` and `p2` lie on the same side of the plane.
    ///
    /// `POSITIVE` for the same side, `NEGATIVE` for opposite sides and
    /// `DEGENERATE` when either point lies in the plane. Points inside the
    /// tolerance band are decided by the exact recomputation.
    #[must_use]
    pub fn orientation(
        &self,
        points: &TrianglePoints,
        p1: &Vector3<f64>,
        p2: &Vector3<f64>,
    ) -> Orientation {
        self.plane(points)
            .fast_orientation(p1, p2)
            .unwrap_or_else(|| Plane::exact_orientation(points, p1, p2))
    }

    /// Strictly on the same side.
    #[must_use]
    pub fn truly_on_same_side(
        &self,
        points: &TrianglePoints,
        p1: &Vector3<f64>,
        p2: &Vector3<f64>,
    ) -> bool {
        self.orientation(points, p1, p2) == Orientation::POSITIVE
    }

    /// On the same side or in the plane.
    #[must_use]
    pub fn on_same_side(&self, points: &TrianglePoints, p1: &Vector3<f64>, p2: &Vector3<f64>) -> bool {
        self.orientation(points, p1, p2) != Orientation::NEGATIVE
    }

    /// Side of `point` relative to the upper side of the triangle.
    #[must_use]
    pub fn orientation_to_upper_side(
        &self,
        points: &TrianglePoints,
        point: &Vector3<f64>,
    ) -> Orientation {
        let side = self
            .plane(points)
            .fast_side(point)
            .unwrap_or_else(|| Plane::exact_side(points, point));
        if self.upper_side_positive {
            side
        } else {
            side.negated()
        }
    }

    /// On the upper side or in the plane.
    #[must_use]
    pub fn on_upper_side(&self, points: &TrianglePoints, point: &Vector3<f64>) -> bool {
        self.orientation_to_upper_side(points, point) != Orientation::NEGATIVE
    }

    /// Strictly on the upper side.
    #[must_use]
    pub fn truly_on_upper_side(&self, points: &TrianglePoints, point: &Vector3<f64>) -> bool {
        self.orientation_to_upper_side(points, point) == Orientation::POSITIVE
    }

    /// Makes the side containing `point` the upper side.
    ///
    /// Returns `false`, leaving the orientation unchanged, when `point` lies in
    /// the plane.
    pub(crate) fn orient_to_side(&mut self, points: &TrianglePoints, point: &Vector3<f64>) -> bool {
        self.update_plane_equation_if_necessary(points);
        let side = self
            .plane(points)
            .fast_side(point)
            .unwrap_or_else(|| Plane::exact_side(points, point));
        match side {
            Orientation::POSITIVE => self.upper_side_positive = true,
            Orientation::NEGATIVE => self.upper_side_positive = false,
            Orientation::DEGENERATE => return false,
        }
        true
    }

    // =========================================================================
    // CIRCLE PREDICATES
    // =========================================================================

    /// Position of a point in the triangle's plane relative to its circumcircle.
    ///
    /// # Errors
    ///
    /// Propagates [`RationalError`] from the exact fallback.
    pub fn circle_orientation(
        &self,
        points: &TrianglePoints,
        point: &Vector3<f64>,
    ) -> Result<InSphere, RationalError> {
        let center = self.circum_center(points);
        let squared_distance = (point - center).norm_squared();
        let squared_radius = (points[0] - center).norm_squared();
        let tolerance = squared_radius * PLANE_TOLERANCE_FACTOR;
        if squared_distance >= squared_radius + tolerance {
            return Ok(InSphere::OUTSIDE);
        }
        if squared_distance <= squared_radius - tolerance {
            return Ok(InSphere::INSIDE);
        }
        let exact = points.map(ExactVector::from);
        let center = circum_center_exact(&exact, &exact_normal(&exact))?;
        let point_distance = center.subtract(&ExactVector::from(point)).squared_length();
        let radius = center.subtract(&exact[0]).squared_length();
        Ok(InSphere::from_sign(radius.signum_against(point_distance)))
    }

    /// Signed Delaunay distance of `fourth_point`.
    ///
    /// This is the offset, along the plane normal and signed toward the upper
    /// side, of the center of the sphere through the triangle and
    /// `fourth_point`. Points below the triangle, and points for which that
    /// sphere does not exist, get `f64::MAX`.
    #[must_use]
    pub fn sd_distance(&self, points: &TrianglePoints, fourth_point: &Vector3<f64>) -> f64 {
        if !self.on_upper_side(points, fourth_point) {
            return f64::MAX;
        }
        let distance = self.unsigned_sd_distance(points, fourth_point);
        if distance == f64::MAX {
            f64::MAX
        } else if self.upper_side_positive {
            distance
        } else {
            -distance
        }
    }

    fn unsigned_sd_distance(&self, points: &TrianglePoints, fourth_point: &Vector3<f64>) -> f64 {
        let plane = self.plane(points);
        let ad = points[0] - fourth_point;
        let mut denominator = ad.dot(&plane.normal);
        if denominator != 0.0 && denominator.abs() < plane.tolerance {
            let exact = points.map(ExactVector::from);
            let normal = exact_normal(&exact);
            let dot = normal.dot(&exact[0].subtract(&ExactVector::from(fourth_point)));
            denominator = if dot.is_zero() {
                0.0
            } else if normal.dot(&ExactVector::from(plane.normal)).value() < 0.0 {
                -dot.value()
            } else {
                dot.value()
            };
        }
        if denominator == 0.0 {
            return f64::MAX;
        }
        let center = self.circum_center(points);
        ad.dot(&((points[0] + fourth_point) * 0.5 - center)) / denominator
    }

    /// Exact counterpart of [`sd_distance`](Self::sd_distance).
    ///
    /// # Errors
    ///
    /// Propagates [`RationalError`] from the exact circumcenter.
    pub fn sd_distance_exact(
        &self,
        points: &TrianglePoints,
        fourth_point: &Vector3<f64>,
    ) -> Result<Rational, RationalError> {
        #[allow(clippy::cast_precision_loss)]
        let unreachable = Rational::new(i64::MAX as f64);
        if !self.on_upper_side(points, fourth_point) {
            return Ok(unreachable);
        }
        let exact = points.map(ExactVector::from);
        let fourth = ExactVector::from(fourth_point);
        let normal = exact_normal(&exact);
        let ad = exact[0].subtract(&fourth);
        let denominator = ad.dot(&normal);
        if denominator.is_zero() {
            return Ok(unreachable);
        }
        let center = circum_center_exact(&exact, &normal)?;
        let mut middle = exact[0].add(&fourth).divide(Rational::new(2.0))?;
        middle.decrease_by(&center);
        let mut distance = middle.dot(&ad).divide(denominator)?;
        if !self.upper_side_positive {
            distance.negate();
        }
        Ok(distance)
    }

    /// Scale of the signed Delaunay distances of this triangle, used to size
    /// tie tolerances.
    #[must_use]
    pub fn typical_sd_distance(&self, points: &TrianglePoints) -> f64 {
        let center = self.circum_center(points);
        (points[0] - center).norm() / self.plane(points).normal.norm()
    }
}

fn compute_circum_center(points: &TrianglePoints) -> Vector3<f64> {
    let a = points[0];
    let n0 = (points[1] - a).try_normalize(0.0).unwrap_or_else(Vector3::zeros);
    let n1 = (points[2] - a).try_normalize(0.0).unwrap_or_else(Vector3::zeros);
    let n2 = n0.cross(&n1);
    three_plane_intersection(
        &[n0, n1, n2],
        [
            (a + points[1]).dot(&n0) * 0.5,
            (a + points[2]).dot(&n1) * 0.5,
            a.dot(&n2),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    fn unit_triangle() -> TrianglePoints {
        [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
        ]
    }

    fn keys(n: usize) -> Vec<NodeKey> {
        let mut map: SlotMap<NodeKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_null_node_moves_to_slot_zero() {
        let k = keys(2);
        let t = Triangle::new(Some(k[0]), None, Some(k[1]));
        assert_eq!(t.nodes(), [None, Some(k[0]), Some(k[1])]);
        let t = Triangle::new(Some(k[0]), Some(k[1]), None);
        assert_eq!(t.nodes(), [None, Some(k[1]), Some(k[0])]);
        assert!(t.is_infinite());
        assert!(t.is_adjacent_to_node(None));
    }

    #[test]
    fn test_tetrahedron_slots() {
        let k = keys(3);
        let mut tets: SlotMap<TetrahedronKey, ()> = SlotMap::with_key();
        let t1 = tets.insert(());
        let t2 = tets.insert(());
        let mut t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        assert!(t.is_completely_open());

        t.add_tetrahedron(t1);
        assert!(t.is_open());
        assert_eq!(t.opposite_tetrahedron(None), Some(Some(t1)));
        assert_eq!(t.opposite_tetrahedron(Some(t1)), Some(None));

        t.add_tetrahedron(t2);
        assert!(t.is_closed());
        assert_eq!(t.opposite_tetrahedron(Some(t2)), Some(Some(t1)));
        assert_eq!(t.opposite_tetrahedron(None), None);

        t.remove_tetrahedron(t1);
        assert_eq!(t.tetrahedra(), [None, Some(t2)]);
    }

    #[test]
    fn test_checking_generation() {
        let k = keys(3);
        let mut t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        assert!(!t.was_checked_already(4));
        assert!(t.was_checked_already(4));
        assert!(!t.was_checked_already(5));
        t.reset_checked();
        assert!(!t.was_checked_already(5));
    }

    #[test]
    fn test_similarity_ignores_slot_order() {
        let k = keys(3);
        let t1 = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        let t2 = Triangle::new(Some(k[2]), Some(k[0]), Some(k[1]));
        assert!(t1.is_similar_to(&t2));
    }

    #[test]
    fn test_circum_center_and_circle_orientation() {
        let k = keys(3);
        let pts = unit_triangle();
        let t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        assert_relative_eq!(t.circum_center(&pts), Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
        assert_eq!(
            t.circle_orientation(&pts, &Vector3::new(1.0, 1.0, 0.0)).unwrap(),
            InSphere::INSIDE
        );
        assert_eq!(
            t.circle_orientation(&pts, &Vector3::new(2.0, 2.0, 0.0)).unwrap(),
            InSphere::BOUNDARY
        );
        assert_eq!(
            t.circle_orientation(&pts, &Vector3::new(5.0, 5.0, 0.0)).unwrap(),
            InSphere::OUTSIDE
        );
    }

    #[test]
    fn test_upper_side_orientation() {
        let k = keys(3);
        let pts = unit_triangle();
        let mut t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        let below = Vector3::new(0.5, 0.5, -1.0);
        assert!(t.orient_to_side(&pts, &below));
        assert!(t.truly_on_upper_side(&pts, &below));
        assert!(!t.on_upper_side(&pts, &Vector3::new(0.5, 0.5, 1.0)));
        assert_eq!(
            t.orientation_to_upper_side(&pts, &Vector3::new(9.0, 9.0, 0.0)),
            Orientation::DEGENERATE
        );
        assert!(!t.orient_to_side(&pts, &Vector3::new(1.0, 3.0, 0.0)));
        assert!(!t.upper_side_positive());
    }

    #[test]
    fn test_sd_distance_orders_candidates() {
        let k = keys(3);
        let pts = unit_triangle();
        let mut t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        t.orient_to_side(&pts, &Vector3::new(0.0, 0.0, 1.0));
        let near = Vector3::new(1.0, 1.0, 0.5);
        let far = Vector3::new(1.0, 1.0, 3.0);
        let d_near = t.sd_distance(&pts, &near);
        let d_far = t.sd_distance(&pts, &far);
        assert!(d_near < d_far);
        assert_eq!(t.sd_distance(&pts, &Vector3::new(1.0, 1.0, -1.0)), f64::MAX);

        let exact_near = t.sd_distance_exact(&pts, &near).unwrap();
        assert_relative_eq!(exact_near.value(), d_near, epsilon = 1e-9);
    }

    #[test]
    fn test_orientation_and_caches() {
        let k = keys(3);
        let pts = unit_triangle();
        let mut t = Triangle::new(Some(k[0]), Some(k[1]), Some(k[2]));
        t.update_plane_equation_if_necessary(&pts);
        t.update_circum_center_if_necessary(&pts);
        let up = Vector3::new(0.3, 0.3, 1.0);
        let down = Vector3::new(0.3, 0.3, -1.0);
        assert!(t.truly_on_same_side(&pts, &up, &up));
        assert!(!t.on_same_side(&pts, &up, &down));
        assert!(t.on_same_side(&pts, &up, &Vector3::new(7.0, 1.0, 0.0)));

        t.inform_about_node_movement();
        let moved = [pts[0], pts[1], Vector3::new(0.0, 4.0, 0.0)];
        assert_relative_eq!(t.circum_center(&moved), Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(t.typical_sd_distance(&moved), 5.0_f64.sqrt() / 8.0, epsilon = 1e-12);
    }
}
