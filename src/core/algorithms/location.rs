//! Geometric predicates on tetrahedra and point location.
//!
//! The in-sphere test dispatches on the kind of tetrahedron:
//!
//! - A regular tetrahedron compares against its cached circumsphere and falls
//!   back to the exact recomputation inside the tolerance band.
//! - An infinite tetrahedron is the half-space beyond its hull face, closed off
//!   by the face's circumcircle on the plane itself.
//! - A flat tetrahedron contains every point off its plane; on the plane it
//!   answers with the circumcircles of its faces.
//!
//! Point location is a visibility walk. The order in which the faces of a
//! tetrahedron are tried comes from the triangulation's
//! [`TriangleOrder`](crate::core::traversal::TriangleOrder), which is shuffled by
//! default so that the walk cannot cycle.

use nalgebra::Vector3;

use crate::core::tetrahedron::{TetrahedronKind, orientation_exact};
use crate::core::traversal::SequentialOrder;
use crate::core::triangulation::{
    NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError,
};
use crate::geometry::predicates::{InSphere, Orientation};

impl<U> Triangulation<U> {
    // =========================================================================
    // IN-SPHERE PREDICATES
    // =========================================================================

    /// Position of `point` relative to the circumsphere of `tetrahedron`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale key or a broken
    /// neighbourhood, [`TriangulationError::Arithmetic`] if the exact fallback
    /// fails.
    pub fn orientation(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
    ) -> Result<InSphere, TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        match tet.kind() {
            TetrahedronKind::Flat => self.flat_orientation(tetrahedron, point),
            TetrahedronKind::Regular(_) if tet.is_infinite() => {
                self.infinite_orientation(tetrahedron, point)
            }
            TetrahedronKind::Regular(sphere) => {
                if sphere.center_is_null {
                    return Ok(InSphere::BOUNDARY);
                }
                if let Some(fast) = sphere.fast_orientation(point) {
                    return Ok(fast);
                }
                let points = self.tetrahedron_points(tetrahedron)?.ok_or_else(|| {
                    TriangulationError::topology("finite tetrahedron with an infinite node")
                })?;
                Ok(orientation_exact(&points, point)?)
            }
        }
    }

    fn infinite_orientation(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
    ) -> Result<InSphere, TriangulationError> {
        let hull_face = self.tetrahedron_ref(tetrahedron)?.triangles()[0];
        let points = self.finite_triangle_points(hull_face)?;
        let triangle = self.triangle_ref(hull_face)?;
        let side = match self.tetrahedron_across(hull_face, Some(tetrahedron))? {
            Some(inner) => {
                let inner = self.tetrahedron_ref(inner)?;
                if inner.is_infinite() {
                    return Ok(InSphere::INSIDE);
                }
                let Some(Some(opposite)) = inner.opposite_node(hull_face) else {
                    return Err(TriangulationError::topology(
                        "hull face without a finite inner node",
                    ));
                };
                triangle.orientation(&points, point, &self.position(opposite)?)
            }
            None => triangle.orientation_to_upper_side(&points, point),
        };
        if side == Orientation::DEGENERATE {
            Ok(triangle.circle_orientation(&points, point)?)
        } else {
            Ok(InSphere::from_sign(-side.sign()))
        }
    }

    fn flat_orientation(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
    ) -> Result<InSphere, TriangulationError> {
        let triangles = self.tetrahedron_ref(tetrahedron)?.triangles();
        let points = self.finite_triangle_points(triangles[0])?;
        let side = self.triangle_ref(triangles[0])?.orientation(&points, point, point);
        if side != Orientation::DEGENERATE {
            return Ok(InSphere::from_sign(side.sign()));
        }
        let mut result = InSphere::OUTSIDE;
        for triangle in triangles {
            let points = self.finite_triangle_points(triangle)?;
            match self.triangle_ref(triangle)?.circle_orientation(&points, point)? {
                InSphere::INSIDE => return Ok(InSphere::INSIDE),
                InSphere::BOUNDARY => result = InSphere::BOUNDARY,
                InSphere::OUTSIDE => {}
            }
        }
        Ok(result)
    }

    /// `point` lies strictly inside the circumsphere of `tetrahedron`.
    ///
    /// # Errors
    ///
    /// See [`orientation`](Self::orientation).
    pub fn is_truly_inside_sphere(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
    ) -> Result<bool, TriangulationError> {
        Ok(self.orientation(tetrahedron, point)?.is_inside())
    }

    /// `point` lies inside or on the circumsphere of `tetrahedron`.
    ///
    /// # Errors
    ///
    /// See [`orientation`](Self::orientation).
    pub fn is_inside_sphere(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
    ) -> Result<bool, TriangulationError> {
        Ok(self.orientation(tetrahedron, point)?.is_inside_or_boundary())
    }

    // =========================================================================
    // CONVEX POSITION
    // =========================================================================

    /// Whether `tetrahedron` and `point`, joined across triangle slot
    /// `connecting`, form a convex polytope.
    ///
    /// `POSITIVE` when every other face separates `point` from nothing,
    /// `DEGENERATE` when `point` lies on the plane of some face and
    /// `NEGATIVE` when it lies beyond one. Infinite tetrahedra are never in
    /// convex position; flat tetrahedra only with coplanar points.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale key.
    pub fn is_in_convex_position(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
        connecting: usize,
    ) -> Result<Orientation, TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        if tet.is_flat() {
            let base = tet.triangles()[0];
            let points = self.finite_triangle_points(base)?;
            let side = self.triangle_ref(base)?.orientation(&points, point, point);
            return Ok(if side == Orientation::DEGENERATE {
                Orientation::DEGENERATE
            } else {
                Orientation::NEGATIVE
            });
        }
        if tet.is_infinite() {
            return Ok(Orientation::NEGATIVE);
        }
        let mut result = 1;
        for slot in (0..4).filter(|&slot| slot != connecting) {
            let (triangle, node) = (tet.triangles()[slot], tet.nodes()[slot]);
            let node = node.ok_or_else(|| TriangulationError::topology("infinite node slot"))?;
            let points = self.finite_triangle_points(triangle)?;
            let side = self
                .triangle_ref(triangle)?
                .orientation(&points, &self.position(node)?, point);
            if side == Orientation::NEGATIVE {
                return Ok(Orientation::NEGATIVE);
            }
            result *= side.sign();
        }
        Ok(Orientation::from_sign(result))
    }

    /// Strict variant of [`is_in_convex_position`](Self::is_in_convex_position)
    /// for regular tetrahedra. A flat tetrahedron answers whether `point` is
    /// coplanar with it.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale key.
    pub fn is_point_in_convex_position(
        &self,
        tetrahedron: TetrahedronKey,
        point: &Vector3<f64>,
        connecting: usize,
    ) -> Result<bool, TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        if tet.is_flat() {
            let base = tet.triangles()[0];
            let points = self.finite_triangle_points(base)?;
            let side = self.triangle_ref(base)?.orientation(&points, point, point);
            return Ok(side == Orientation::DEGENERATE);
        }
        if tet.is_infinite() {
            return Ok(false);
        }
        for slot in (0..4).filter(|&slot| slot != connecting) {
            let (triangle, node) = (tet.triangles()[slot], tet.nodes()[slot]);
            let node = node.ok_or_else(|| TriangulationError::topology("infinite node slot"))?;
            let points = self.finite_triangle_points(triangle)?;
            if !self
                .triangle_ref(triangle)?
                .truly_on_same_side(&points, &self.position(node)?, point)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a tetrahedron could still be attached to `triangle` on the side
    /// of `point`.
    ///
    /// A completely open triangle is open to both sides and a closed one to
    /// neither. With one neighbour, the open side is the one facing away from
    /// that neighbour's opposite node. An infinite neighbour or an infinite
    /// triangle leaves every side open.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale key.
    pub fn is_open_to_side(
        &self,
        triangle: TriangleKey,
        point: &Vector3<f64>,
    ) -> Result<bool, TriangulationError> {
        let t = self.triangle_ref(triangle)?;
        let neighbour = match t.tetrahedra() {
            [None, None] => return Ok(true),
            [Some(n), None] | [None, Some(n)] => n,
            [Some(_), Some(_)] => return Ok(false),
        };
        let tet = self.tetrahedron_ref(neighbour)?;
        let Some(points) = self.triangle_points(triangle)? else {
            return Ok(true);
        };
        if tet.is_infinite() {
            return Ok(true);
        }
        let Some(Some(opposite)) = tet.opposite_node(triangle) else {
            return Err(TriangulationError::topology(format!(
                "{triangle:?} is not a face of {neighbour:?}"
            )));
        };
        Ok(!t.on_same_side(&points, &self.position(opposite)?, point))
    }

    // =========================================================================
    // POINT LOCATION
    // =========================================================================

    /// A free position near `node`.
    ///
    /// The node is shifted by half its smallest neighbour distance toward its
    /// farthest neighbour, or outward through the hull when it lies on the
    /// convex hull. An isolated node keeps its position.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn propose_new_position(&self, node: NodeKey) -> Result<Vector3<f64>, TriangulationError> {
        let position = self.position(node)?;
        let mut min_distance = f64::MAX;
        let mut max_distance = f64::MIN;
        let mut direction = Vector3::zeros();
        for neighbour in self.neighbor_nodes(node)? {
            let diff = self.position(neighbour)? - position;
            let distance = diff.norm_squared();
            min_distance = min_distance.min(distance);
            if distance > max_distance {
                max_distance = distance;
                direction = diff;
            }
        }
        if min_distance == f64::MAX {
            return Ok(position);
        }
        let hull = self
            .adjacent_tetrahedra(node)?
            .iter()
            .copied()
            .find(|&t| self.is_infinite_tetrahedron(t).unwrap_or(false));
        if let Some(hull) = hull {
            let face = self.tetrahedron_ref(hull)?.triangles()[0];
            let points = self.finite_triangle_points(face)?;
            let triangle = self.triangle_ref(face)?;
            direction = triangle.plane(&points).normal;
            if let Some(inner) = self.tetrahedron_across(face, Some(hull))? {
                if let Some(Some(opposite)) = self.tetrahedron_ref(inner)?.opposite_node(face) {
                    let outer = position + direction;
                    if triangle.on_same_side(&points, &outer, &self.position(opposite)?) {
                        direction = -direction;
                    }
                }
            }
        }
        let length = direction.norm();
        if length == 0.0 {
            return Ok(position);
        }
        Ok(position + direction * (0.5 * min_distance.sqrt() / length))
    }

    /// Fails with [`TriangulationError::PositionNotAllowed`] if `position`
    /// coincides with a node of `tetrahedron`.
    pub(crate) fn test_position(
        &self,
        tetrahedron: TetrahedronKey,
        position: &Vector3<f64>,
    ) -> Result<(), TriangulationError> {
        for node in self.tetrahedron_ref(tetrahedron)?.nodes().into_iter().flatten() {
            if self.position(node)? == *position {
                return Err(TriangulationError::PositionNotAllowed {
                    position: (*position).into(),
                    node,
                    suggestion: self.propose_new_position(node)?.into(),
                });
            }
        }
        Ok(())
    }

    /// One step of the visibility walk toward `coordinate`.
    ///
    /// Returns the neighbour across the first face (in `order`) that separates
    /// `coordinate` from the tetrahedron, or `tetrahedron` itself if none does.
    pub(crate) fn walk_to_point(
        &self,
        tetrahedron: TetrahedronKey,
        coordinate: &Vector3<f64>,
        order: [usize; 4],
    ) -> Result<TetrahedronKey, TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        if tet.is_infinite() {
            if !self.is_inside_sphere(tetrahedron, coordinate)? {
                return self.adjacent_tetrahedron(tetrahedron, 0)?.ok_or_else(|| {
                    TriangulationError::topology("hull face with a single tetrahedron")
                });
            }
        } else {
            for slot in order {
                let triangle = tet.triangles()[slot];
                let node = tet.nodes()[slot]
                    .ok_or_else(|| TriangulationError::topology("infinite node slot"))?;
                let points = self.finite_triangle_points(triangle)?;
                let side = self
                    .triangle_ref(triangle)?
                    .orientation(&points, &self.position(node)?, coordinate);
                let opposite = || {
                    self.tetrahedron_across(triangle, Some(tetrahedron))?
                        .ok_or_else(|| TriangulationError::topology("open triangle in a closed mesh"))
                };
                match side {
                    Orientation::NEGATIVE => return opposite(),
                    Orientation::DEGENERATE => {
                        let neighbour = opposite()?;
                        if self.is_infinite_tetrahedron(neighbour)?
                            && self.is_truly_inside_sphere(tetrahedron, coordinate)?
                        {
                            self.test_position(tetrahedron, coordinate)?;
                            return Ok(neighbour);
                        }
                    }
                    Orientation::POSITIVE => {}
                }
            }
        }
        self.test_position(tetrahedron, coordinate)?;
        Ok(tetrahedron)
    }

    /// Walks from `start` to the tetrahedron containing `coordinate`, or to
    /// the infinite tetrahedron whose hull face sees it.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::CycleDetected`] after `walk_step_limit` steps,
    /// [`TriangulationError::PositionNotAllowed`] when `coordinate` hits a node.
    pub(crate) fn search_initial_insertion_tetrahedron(
        &mut self,
        start: TetrahedronKey,
        coordinate: &Vector3<f64>,
    ) -> Result<TetrahedronKey, TriangulationError> {
        let mut current = start;
        if self.is_infinite_tetrahedron(current)? {
            current = self.adjacent_tetrahedron(current, 0)?.ok_or_else(|| {
                TriangulationError::topology("hull face with a single tetrahedron")
            })?;
        }
        let limit = self.config.walk_step_limit;
        let mut last = None;
        let mut steps = 0;
        while last != Some(current) && !self.is_infinite_tetrahedron(current)? {
            if steps >= limit {
                tracing::warn!(steps, "point location exceeded its step limit");
                return Err(TriangulationError::CycleDetected { steps });
            }
            steps += 1;
            last = Some(current);
            let order = self.triangle_order.next_order();
            current = self.walk_to_point(current, coordinate, order)?;
        }
        Ok(current)
    }

    /// Payloads of the vertices of the finite tetrahedron containing
    /// `position`, walking from the tetrahedra around `node`.
    ///
    /// Returns `None` when `position` lies outside the convex hull. A walk that
    /// hits a node stops at the tetrahedron it reached.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key,
    /// [`TriangulationError::CycleDetected`] if the walk does not terminate.
    pub fn vertices_of_tetrahedron_containing(
        &self,
        node: NodeKey,
        position: impl Into<Vector3<f64>>,
    ) -> Result<Option<[&U; 4]>, TriangulationError> {
        let position = position.into();
        let Some(&start) = self.node_ref(node)?.adjacent_tetrahedra().first() else {
            return Ok(None);
        };
        let mut current = start;
        if self.is_infinite_tetrahedron(current)? {
            match self.adjacent_tetrahedron(current, 0)? {
                Some(inner) => current = inner,
                None => return Ok(None),
            }
        }
        let mut last = None;
        let mut steps = 0;
        while last != Some(current) && !self.is_infinite_tetrahedron(current)? {
            if steps >= self.config.walk_step_limit {
                return Err(TriangulationError::CycleDetected { steps });
            }
            steps += 1;
            last = Some(current);
            match self.walk_to_point(current, &position, SequentialOrder::ORDER) {
                Ok(next) => current = next,
                Err(TriangulationError::PositionNotAllowed { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        if self.is_infinite_tetrahedron(current)? {
            return Ok(None);
        }
        let nodes = self.tetrahedron_ref(current)?.nodes();
        let mut payloads = Vec::with_capacity(4);
        for node in nodes {
            let node = node.ok_or_else(|| TriangulationError::topology("infinite node slot"))?;
            payloads.push(self.payload(node)?);
        }
        let [a, b, c, d] = payloads[..] else {
            return Err(TriangulationError::topology("tetrahedron without four nodes"));
        };
        Ok(Some([a, b, c, d]))
    }
}
