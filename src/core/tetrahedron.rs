//! Tetrahedra and their circumspheres.
//!
//! A [`Tetrahedron`] stores four node slots, four triangle slots (triangle `i`
//! lies opposite node `i`), six edge slots and the share of the Voronoi facet
//! areas it contributes to each edge. Node slot 0 is empty for the "infinite"
//! tetrahedra that close the convex hull.
//!
//! The kind is a tagged union: a [`TetrahedronKind::Regular`] tetrahedron carries
//! its circumsphere, a [`TetrahedronKind::Flat`] one has four coplanar nodes and
//! no sphere. Wiring a tetrahedron into the mesh needs the arena and lives on
//! [`Triangulation`](crate::core::triangulation::Triangulation); this module
//! holds the per-tetrahedron geometry.

use nalgebra::{Matrix3, Vector3};

use crate::core::triangulation::{EdgeKey, NodeKey, TriangleKey};
use crate::geometry::exact_vector::ExactVector;
use crate::geometry::predicates::{
    INITIAL_SPHERE_TOLERANCE, InSphere, RELATIVE_ERROR, three_plane_intersection,
    three_plane_intersection_exact,
};
use crate::geometry::rational::{Rational, RationalError};

/// Positions of the four nodes of a finite tetrahedron, in slot order.
pub type TetrahedronPoints = [Vector3<f64>; 4];

/// Index of the edge between node slots `i` and `j` (01→0, 02→1, 03→2, 12→3,
/// 13→4, 23→5).
#[inline]
#[must_use]
pub const fn edge_number(i: usize, j: usize) -> usize {
    if i == 0 || j == 0 { i + j - 1 } else { i + j }
}

/// The node slot pairs in edge order.
pub const EDGE_NODE_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

// =============================================================================
// CIRCUMSPHERE
// =============================================================================

/// Circumsphere of a regular tetrahedron with its floating error bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircumSphere {
    /// Center of the sphere.
    pub center: Vector3<f64>,
    /// Squared radius.
    pub squared_radius: f64,
    /// Half width of the band around `squared_radius` in which the floating
    /// comparison is not trusted.
    pub tolerance: f64,
    /// Set while no center could be computed.
    pub center_is_null: bool,
}

impl Default for CircumSphere {
    fn default() -> Self {
        Self {
            center: Vector3::zeros(),
            squared_radius: 0.0,
            tolerance: INITIAL_SPHERE_TOLERANCE,
            center_is_null: true,
        }
    }
}

impl CircumSphere {
    /// Computes the circumsphere of `points` together with the volume.
    ///
    /// The center is the intersection of the three bisector planes between node
    /// 0 and the others. The tolerance propagates [`RELATIVE_ERROR`] through the
    /// normalization, the offsets, the determinant and the final division. A
    /// zero determinant leaves the center null with a zero tolerance.
    #[must_use]
    pub fn compute(points: &TetrahedronPoints) -> (Self, f64) {
        let raw = [
            points[1] - points[0],
            points[2] - points[0],
            points[3] - points[0],
        ];
        let volume = determinant(&raw).abs() / 6.0;

        let nm = raw
            .iter()
            .flat_map(|n| n.iter().copied())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let max_length_2 = raw
            .iter()
            .map(Vector3::norm_squared)
            .fold(0.0_f64, f64::max);
        let normals = raw.map(|n| n / n.norm());

        let dns_2 = (nm * nm * (1.0 / max_length_2 + 1.0 / (max_length_2 * max_length_2))).max(1.0);
        let ddet_2 = 36.0 * dns_2;
        let pm = points
            .iter()
            .flat_map(|p| p.iter().copied())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let pm_2 = pm * pm;
        let doff_2 = 6.0 * pm_2 * (dns_2 + 1.0);
        let dscalar_2 = 4.0 * doff_2 + 36.0 * pm_2 * dns_2;

        let det = determinant(&normals);
        let offsets = [
            0.5 * normals[0].dot(&(points[0] + points[1])),
            0.5 * normals[1].dot(&(points[0] + points[2])),
            0.5 * normals[2].dot(&(points[0] + points[3])),
        ];

        if det == 0.0 || !det.is_finite() {
            let sphere = Self {
                center: Vector3::repeat(f64::MAX),
                squared_radius: f64::INFINITY,
                tolerance: 0.0,
                center_is_null: true,
            };
            return (sphere, volume);
        }

        let center = three_plane_intersection(&normals, offsets);
        let squared_radius = (center - points[0]).norm_squared();
        let det_2 = det * det;
        let ddiv_2 = 3.0 * dscalar_2 / det_2 + 324.0 * pm_2 * ddet_2 / (det_2 * det_2);
        let tolerance = (12.0 * ddiv_2 * squared_radius).sqrt() * RELATIVE_ERROR;
        let sphere = Self {
            center,
            squared_radius,
            tolerance,
            center_is_null: false,
        };
        (sphere, volume)
    }

    /// Floating containment test, or `None` inside the tolerance band.
    #[inline]
    #[must_use]
    pub fn fast_orientation(&self, point: &Vector3<f64>) -> Option<InSphere> {
        let distance = (self.center - point).norm_squared();
        if distance > self.squared_radius + self.tolerance {
            Some(InSphere::OUTSIDE)
        } else if distance < self.squared_radius - self.tolerance {
            Some(InSphere::INSIDE)
        } else {
            None
        }
    }
}

/// Exact containment test of `point` in the sphere through `points`.
///
/// # Errors
///
/// Propagates [`RationalError`] from the exact plane intersection.
pub fn orientation_exact(
    points: &TetrahedronPoints,
    point: &Vector3<f64>,
) -> Result<InSphere, RationalError> {
    let exact = points.map(ExactVector::from);
    let normals = [
        exact[1].subtract(&exact[0]),
        exact[2].subtract(&exact[0]),
        exact[3].subtract(&exact[0]),
    ];
    let half = Rational::new(0.5);
    let offsets = [0, 1, 2].map(|j| exact[0].add(&exact[j + 1]).dot(&normals[j]).multiply(half));
    let center = three_plane_intersection_exact(&normals, offsets)?;
    let squared_radius = center.subtract(&exact[0]).squared_length();
    let distance = center.subtract(&ExactVector::from(point)).squared_length();
    Ok(InSphere::from_sign(squared_radius.signum_against(distance)))
}

/// Cross-section contribution of a finite tetrahedron to each of its edges.
///
/// For the edge between nodes `j` and `k` this is the area of the part of the
/// dual Voronoi facet inside the tetrahedron, approximated through the edge
/// midpoint, the centroids of the two faces sharing the edge and the centroid
/// of the tetrahedron.
#[must_use]
pub fn cross_section_areas(points: &TetrahedronPoints) -> [f64; 6] {
    let tetra_middle = (points[0] + points[1] + points[2] + points[3]) * 0.25;
    let area_middles: [Vector3<f64>; 4] = [0, 1, 2, 3].map(|j| {
        let mut sum = Vector3::zeros();
        for (k, p) in points.iter().enumerate() {
            if k != j {
                sum += p;
            }
        }
        sum / 3.0
    });
    let mut areas = [0.0; 6];
    for (line, &(j, k)) in EDGE_NODE_PAIRS.iter().enumerate() {
        // the facet dual to edge (j, k) passes through the centroids of the
        // faces opposite the two other nodes
        let (m, n) = other_pair(j, k);
        let line_middle = (points[j] + points[k]) * 0.5;
        let line_vector = points[j] - points[k];
        let cross = (line_middle - tetra_middle).cross(&(area_middles[m] - area_middles[n]));
        areas[line] = (cross.dot(&line_vector) / line_vector.norm()).abs();
    }
    areas
}

/// The two node slots not in `{j, k}`, in increasing order.
#[inline]
const fn other_pair(j: usize, k: usize) -> (usize, usize) {
    let mut found = [0; 2];
    let mut count = 0;
    let mut i = 0;
    while i < 4 {
        if i != j && i != k {
            found[count] = i;
            count += 1;
        }
        i += 1;
    }
    (found[0], found[1])
}

fn determinant(rows: &[Vector3<f64>; 3]) -> f64 {
    Matrix3::from_rows(&[rows[0].transpose(), rows[1].transpose(), rows[2].transpose()])
        .determinant()
}

// =============================================================================
// TETRAHEDRON
// =============================================================================

/// Geometric kind of a tetrahedron.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TetrahedronKind {
    /// Non-degenerate (or infinite) tetrahedron with a circumsphere.
    Regular(CircumSphere),
    /// Four coplanar nodes.
    Flat,
}

/// A tetrahedron of the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Tetrahedron {
    pub(crate) nodes: [Option<NodeKey>; 4],
    pub(crate) triangles: [TriangleKey; 4],
    pub(crate) edges: [Option<EdgeKey>; 6],
    pub(crate) cross_section_areas: [f64; 6],
    pub(crate) volume: f64,
    pub(crate) kind: TetrahedronKind,
}

impl Tetrahedron {
    /// Creates an unwired tetrahedron.
    #[must_use]
    pub(crate) fn new(nodes: [Option<NodeKey>; 4], triangles: [TriangleKey; 4], flat: bool) -> Self {
        Self {
            nodes,
            triangles,
            edges: [None; 6],
            cross_section_areas: [0.0; 6],
            volume: 0.0,
            kind: if flat {
                TetrahedronKind::Flat
            } else {
                TetrahedronKind::Regular(CircumSphere::default())
            },
        }
    }

    /// The four node slots.
    #[inline]
    #[must_use]
    pub const fn nodes(&self) -> [Option<NodeKey>; 4] {
        self.nodes
    }

    /// The four triangle slots; triangle `i` is opposite node `i`.
    #[inline]
    #[must_use]
    pub const fn triangles(&self) -> [TriangleKey; 4] {
        self.triangles
    }

    /// The six edge slots, empty for infinite tetrahedra.
    #[inline]
    #[must_use]
    pub const fn edges(&self) -> [Option<EdgeKey>; 6] {
        self.edges
    }

    /// Cross-section contributions, in edge order.
    #[inline]
    #[must_use]
    pub const fn cross_section_areas(&self) -> [f64; 6] {
        self.cross_section_areas
    }

    /// Volume; zero for infinite and flat tetrahedra.
    #[inline]
    #[must_use]
    pub const fn volume(&self) -> f64 {
        self.volume
    }

    /// Geometric kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &TetrahedronKind {
        &self.kind
    }

    /// The circumsphere of a regular tetrahedron.
    #[inline]
    #[must_use]
    pub const fn circum_sphere(&self) -> Option<&CircumSphere> {
        match &self.kind {
            TetrahedronKind::Regular(sphere) => Some(sphere),
            TetrahedronKind::Flat => None,
        }
    }

    /// Node slot 0 is the point at infinity.
    #[inline]
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.nodes[0].is_none()
    }

    /// Four coplanar nodes.
    #[inline]
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        matches!(self.kind, TetrahedronKind::Flat)
    }

    /// Whether `node` is one of the four nodes. `None` tests for infiniteness.
    #[inline]
    #[must_use]
    pub fn is_adjacent_to(&self, node: Option<NodeKey>) -> bool {
        self.nodes.contains(&node)
    }

    /// Slot of `node`.
    #[inline]
    #[must_use]
    pub fn node_number(&self, node: Option<NodeKey>) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    /// Slot of `triangle`.
    #[inline]
    #[must_use]
    pub fn triangle_number(&self, triangle: TriangleKey) -> Option<usize> {
        self.triangles.iter().position(|t| *t == triangle)
    }

    /// The triangle opposite `node`.
    #[inline]
    #[must_use]
    pub fn opposite_triangle(&self, node: Option<NodeKey>) -> Option<TriangleKey> {
        self.node_number(node).map(|i| self.triangles[i])
    }

    /// The node opposite `triangle`. The outer `None` means `triangle` is not a
    /// face of this tetrahedron.
    #[inline]
    #[must_use]
    pub fn opposite_node(&self, triangle: TriangleKey) -> Option<Option<NodeKey>> {
        self.triangle_number(triangle).map(|i| self.nodes[i])
    }

    /// The edge between two nodes of this tetrahedron.
    #[must_use]
    pub fn edge_between(&self, a: Option<NodeKey>, b: Option<NodeKey>) -> Option<EdgeKey> {
        let i = self.node_number(a)?;
        let j = self.node_number(b)?;
        if i == j {
            return None;
        }
        self.edges[edge_number(i, j)]
    }

    /// First node slot, in ascending order, holding neither `a` nor `b`.
    #[must_use]
    pub fn first_other_node(&self, a: Option<NodeKey>, b: Option<NodeKey>) -> Option<Option<NodeKey>> {
        self.nodes.iter().copied().find(|n| *n != a && *n != b)
    }

    /// Last node slot, in descending order, holding neither `a` nor `b`.
    #[must_use]
    pub fn second_other_node(
        &self,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
    ) -> Option<Option<NodeKey>> {
        self.nodes.iter().rev().copied().find(|n| *n != a && *n != b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_corner() -> TetrahedronPoints {
        [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_edge_numbering() {
        for (index, &(i, j)) in EDGE_NODE_PAIRS.iter().enumerate() {
            assert_eq!(edge_number(i, j), index);
            assert_eq!(edge_number(j, i), index);
        }
        assert_eq!(other_pair(0, 1), (2, 3));
        assert_eq!(other_pair(1, 3), (0, 2));
    }

    #[test]
    fn test_circum_sphere_of_unit_corner() {
        let (sphere, volume) = CircumSphere::compute(&unit_corner());
        assert_relative_eq!(volume, 1.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(sphere.center, Vector3::new(0.5, 0.5, 0.5), epsilon = 1e-12);
        assert_relative_eq!(sphere.squared_radius, 0.75, epsilon = 1e-12);
        assert!(!sphere.center_is_null);
        assert!(sphere.tolerance > 0.0 && sphere.tolerance < 1e-10);

        assert_eq!(
            sphere.fast_orientation(&Vector3::new(0.4, 0.4, 0.4)),
            Some(InSphere::INSIDE)
        );
        assert_eq!(
            sphere.fast_orientation(&Vector3::new(2.0, 2.0, 2.0)),
            Some(InSphere::OUTSIDE)
        );
        assert_eq!(sphere.fast_orientation(&Vector3::new(1.0, 1.0, 1.0)), None);
    }

    #[test]
    fn test_exact_orientation_on_sphere() {
        let pts = unit_corner();
        assert_eq!(
            orientation_exact(&pts, &Vector3::new(1.0, 1.0, 1.0)).unwrap(),
            InSphere::BOUNDARY
        );
        assert_eq!(
            orientation_exact(&pts, &Vector3::new(0.5, 0.5, 0.5)).unwrap(),
            InSphere::INSIDE
        );
        assert_eq!(
            orientation_exact(&pts, &Vector3::new(3.0, 0.0, 0.0)).unwrap(),
            InSphere::OUTSIDE
        );
    }

    #[test]
    fn test_coplanar_points_have_null_center() {
        let mut pts = unit_corner();
        pts[3] = Vector3::new(1.0, 1.0, 0.0);
        let (sphere, volume) = CircumSphere::compute(&pts);
        assert!(sphere.center_is_null);
        assert_relative_eq!(volume, 0.0);
        assert_relative_eq!(sphere.tolerance, 0.0);
    }

    #[test]
    fn test_cross_sections_are_symmetric_for_regular_tetrahedron() {
        let pts = [
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.0, -1.0, -1.0),
            Vector3::new(-1.0, 1.0, -1.0),
            Vector3::new(-1.0, -1.0, 1.0),
        ];
        let areas = cross_section_areas(&pts);
        for area in areas {
            assert!(area > 0.0);
            assert_relative_eq!(area, areas[0], epsilon = 1e-12);
        }
    }
}
