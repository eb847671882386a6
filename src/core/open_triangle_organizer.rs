//! Closing a cavity bounded by open triangles.
//!
//! Insertion and removal both cut a star-shaped (or, after removal, arbitrary)
//! hole out of the mesh. The [`OpenTriangleOrganizer`] collects the triangles on
//! the rim of that hole and fills it with new tetrahedra:
//!
//! - In the insertion case every rim triangle is connected to the new node.
//! - In the removal case [`OpenTriangleOrganizer::triangulate`] repeatedly picks
//!   an open triangle and the rim node with the smallest signed Delaunay
//!   distance to it. Ties (several nodes on one empty sphere) are resolved by
//!   triangulating the cospherical surface first and coning it from the node
//!   with the smallest id.
//!
//! The organizer deduplicates triangles by their node ids, so a triangle asked
//! for twice (once from each tetrahedron that will share it) is only created
//! once.

use std::cmp::Ordering;
use std::collections::VecDeque;

use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::core::collections::{FastHashMap, FastHashSet};
use crate::core::hash_keys::{EdgeHashKey, TriangleHashKey};
use crate::core::node_organizer::NodeOrganizer;
use crate::core::triangle::TrianglePoints;
use crate::core::triangulation::{
    NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError,
};
use crate::geometry::exact_vector::ExactVector;
use crate::geometry::predicates::{
    InSphere, Orientation, SD_DISTANCE_TOLERANCE_FACTOR, three_plane_intersection,
    three_plane_intersection_exact,
};
use crate::geometry::rational::{Rational, RationalError};

/// Relative tolerance for ties between squared distances and between cosines.
const TIE_TOLERANCE: f64 = 1e-9;

type EdgeMap = FastHashSet<EdgeHashKey>;

/// Bookkeeping for one cavity-closing operation.
#[derive(Debug, Default)]
pub struct OpenTriangleOrganizer {
    map: FastHashMap<TriangleHashKey, TriangleKey>,
    open_triangles: Vec<TriangleKey>,
    node_organizer: NodeOrganizer,
    new_tetrahedra: Vec<TetrahedronKey>,
    a_new_tetrahedron: Option<TetrahedronKey>,
}

impl OpenTriangleOrganizer {
    /// An empty organizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tetrahedra created through this organizer, in creation order.
    #[must_use]
    pub fn new_tetrahedra(&self) -> &[TetrahedronKey] {
        &self.new_tetrahedra
    }

    /// The most recently created tetrahedron.
    #[must_use]
    pub const fn a_new_tetrahedron(&self) -> Option<TetrahedronKey> {
        self.a_new_tetrahedron
    }

    /// Whether no triangle is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // =========================================================================
    // TRIANGLE REGISTRY
    // =========================================================================

    fn node_id<U>(mesh: &Triangulation<U>, node: Option<NodeKey>) -> Result<Option<u64>, TriangulationError> {
        node.map(|n| mesh.id(n)).transpose()
    }

    fn hash_key<U>(
        mesh: &Triangulation<U>,
        [a, b, c]: [Option<NodeKey>; 3],
    ) -> Result<TriangleHashKey, TriangulationError> {
        Ok(TriangleHashKey::new(
            Self::node_id(mesh, a)?,
            Self::node_id(mesh, b)?,
            Self::node_id(mesh, c)?,
        ))
    }

    /// Registers an open triangle of the rim and its nodes.
    pub(crate) fn put_triangle<U>(
        &mut self,
        mesh: &Triangulation<U>,
        triangle: TriangleKey,
    ) -> Result<(), TriangulationError> {
        let nodes = mesh.triangle_ref(triangle)?.nodes();
        self.map.insert(Self::hash_key(mesh, nodes)?, triangle);
        for node in [nodes[1], nodes[2], nodes[0]].into_iter().flatten() {
            self.node_organizer.add_node(node, mesh.id(node)?);
        }
        self.open_triangles.push(triangle);
        Ok(())
    }

    /// Unregisters a triangle.
    pub(crate) fn remove_triangle<U>(
        &mut self,
        mesh: &Triangulation<U>,
        triangle: TriangleKey,
    ) -> Result<(), TriangulationError> {
        let nodes = mesh.triangle_ref(triangle)?.nodes();
        self.map.remove(&Self::hash_key(mesh, nodes)?);
        Ok(())
    }

    /// Whether a triangle over `a`, `b`, `c` is registered.
    pub(crate) fn contains<U>(
        &self,
        mesh: &Triangulation<U>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> Result<bool, TriangulationError> {
        Ok(self.map.contains_key(&Self::hash_key(mesh, [a, b, c])?))
    }

    /// The triangle over `a`, `b`, `c` for a tetrahedron about to be created.
    ///
    /// A registered triangle is withdrawn from the registry, since its second
    /// tetrahedron is being built, unless it is completely open. An absent one is
    /// created and registered, because its other side is still open.
    pub(crate) fn get_triangle<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> Result<TriangleKey, TriangulationError> {
        let key = Self::hash_key(mesh, [a, b, c])?;
        match self.map.get(&key).copied() {
            None => {
                let triangle = mesh.create_triangle([a, b, c]);
                self.map.insert(key, triangle);
                self.open_triangles.push(triangle);
                Ok(triangle)
            }
            Some(triangle) => {
                if mesh.triangle_ref(triangle)?.is_completely_open() {
                    self.open_triangles.push(triangle);
                } else {
                    self.map.remove(&key);
                }
                Ok(triangle)
            }
        }
    }

    /// Like [`get_triangle`](Self::get_triangle) but never withdraws.
    pub(crate) fn get_triangle_without_removing<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> Result<TriangleKey, TriangulationError> {
        let key = Self::hash_key(mesh, [a, b, c])?;
        if let Some(&triangle) = self.map.get(&key) {
            return Ok(triangle);
        }
        let triangle = mesh.create_triangle([a, b, c]);
        self.map.insert(key, triangle);
        self.open_triangles.push(triangle);
        Ok(triangle)
    }

    /// Pops the next triangle that still needs a tetrahedron.
    fn get_an_open_triangle<U>(&mut self, mesh: &Triangulation<U>) -> Option<TriangleKey> {
        while let Some(triangle) = self.open_triangles.pop() {
            let Some(t) = mesh.triangles.get(triangle) else {
                continue;
            };
            if !(t.is_infinite() || t.is_closed() || t.is_completely_open()) {
                return Some(triangle);
            }
        }
        None
    }

    // =========================================================================
    // TETRAHEDRON CREATION
    // =========================================================================

    /// Creates the tetrahedron over `triangle` with apex `point`.
    ///
    /// `None` as apex builds an infinite tetrahedron. An infinite `triangle`
    /// is swapped for the finite triangle through its two real nodes and
    /// `point`, and the apex becomes the infinite node.
    pub(crate) fn create_tetrahedron_from_triangle<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        triangle: TriangleKey,
        point: Option<NodeKey>,
    ) -> Result<TetrahedronKey, TriangulationError> {
        let mut triangle = triangle;
        let mut point = point;
        let nodes = mesh.triangle_ref(triangle)?.nodes();
        if nodes[0].is_none() {
            if point.is_none() {
                return Err(TriangulationError::topology(
                    "an infinite triangle needs a finite apex",
                ));
            }
            triangle = self.get_triangle_without_removing(mesh, nodes[1], nodes[2], point)?;
            point = None;
        }
        let t = mesh.triangle_ref(triangle)?.nodes();
        if !mesh.triangle_ref(triangle)?.is_completely_open() {
            self.remove_triangle(mesh, triangle)?;
        }
        let t1 = self.get_triangle(mesh, point, t[1], t[2])?;
        let t2 = self.get_triangle(mesh, point, t[0], t[2])?;
        let t3 = self.get_triangle(mesh, point, t[0], t[1])?;
        let created =
            mesh.create_tetrahedron_from_parts([triangle, t1, t2, t3], [point, t[0], t[1], t[2]], false)?;
        self.new_tetrahedra.push(created);
        self.a_new_tetrahedron = Some(created);
        Ok(created)
    }

    /// Removes `start` and, transitively, every neighbour of the same kind
    /// (finite or infinite) whose opposite node lies in the sphere of the
    /// tetrahedron that reached it. The triangles left behind are registered.
    pub(crate) fn remove_all_tetrahedra_in_sphere<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        start: TetrahedronKey,
    ) -> Result<(), TriangulationError> {
        let mut worklist = vec![start];
        while let Some(current) = worklist.pop() {
            let Some(tetrahedron) = mesh.tetrahedra.get(current).cloned() else {
                continue;
            };
            for triangle in tetrahedron.triangles {
                if let Some(opposite) = mesh.tetrahedron_across(triangle, Some(current))? {
                    let neighbour = mesh.tetrahedron_ref(opposite)?;
                    if neighbour.is_infinite() == tetrahedron.is_infinite() {
                        if let Some(Some(node)) = neighbour.opposite_node(triangle) {
                            let position = mesh.position(node)?;
                            if mesh.is_inside_sphere(current, &position)? {
                                worklist.push(opposite);
                            }
                        }
                    }
                }
                if mesh.triangle_ref(triangle)?.is_closed() {
                    self.put_triangle(mesh, triangle)?;
                } else {
                    self.remove_triangle(mesh, triangle)?;
                }
            }
            mesh.remove_tetrahedron(current)?;
        }
        Ok(())
    }

    // =========================================================================
    // CAVITY TRIANGULATION
    // =========================================================================

    /// Fills the cavity bounded by the registered open triangles.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::RetriangulationStalled`] when more than
    /// `organizer_step_limit` triangles are processed.
    pub(crate) fn triangulate<U>(&mut self, mesh: &mut Triangulation<U>) -> Result<(), TriangulationError> {
        if self.open_triangles.is_empty() {
            self.create_initial_triangle(mesh)?;
        }
        let limit = mesh.config.organizer_step_limit;
        let mut steps = 0;
        while let Some(open) = self.get_an_open_triangle(mesh) {
            steps += 1;
            if steps > limit {
                warn!(steps, "cavity retriangulation exceeded its step limit");
                return Err(TriangulationError::RetriangulationStalled { steps });
            }
            let points = mesh.finite_triangle_points(open)?;
            let triangle = mesh.triangle_mut(open)?;
            triangle.update_plane_equation_if_necessary(&points);
            triangle.update_circum_center_if_necessary(&points);
            orient_to_open_side(mesh, open, &points)?;

            let (picked, similar, on_circle) = self.closest_apex(mesh, open, &points)?;
            match picked {
                Some(apex) if !similar.is_empty() || !on_circle.is_empty() => {
                    let mut similar = similar;
                    similar.push(apex);
                    debug!(
                        similar = similar.len(),
                        on_circle = on_circle.len(),
                        "triangulating cospherical nodes"
                    );
                    self.triangulate_points_on_sphere(mesh, similar, on_circle, open)?;
                }
                apex => {
                    self.create_tetrahedron_from_triangle(mesh, open, apex)?;
                }
            }
        }
        Ok(())
    }

    /// Searches the rim node with the smallest signed Delaunay distance to
    /// `open`. Also returns the nodes tied with it and the nodes lying on the
    /// triangle's circumcircle.
    fn closest_apex<U>(
        &self,
        mesh: &Triangulation<U>,
        open: TriangleKey,
        points: &TrianglePoints,
    ) -> Result<(Option<NodeKey>, Vec<NodeKey>, Vec<NodeKey>), TriangulationError> {
        let triangle = mesh.triangle_ref(open)?;
        let tolerance = triangle.typical_sd_distance(points) * SD_DISTANCE_TOLERANCE_FACTOR;
        let mut upper_bound = f64::MAX;
        let mut lower_bound = f64::MAX;
        let mut picked: Option<(NodeKey, Vector3<f64>)> = None;
        let mut similar = Vec::new();
        let mut on_circle = Vec::new();
        for node in self.node_organizer.nodes() {
            if triangle.is_adjacent_to_node(Some(node)) {
                continue;
            }
            let position = mesh.position(node)?;
            let distance = triangle.sd_distance(points, &position);
            if distance < upper_bound {
                let mut smaller = true;
                if distance > lower_bound {
                    if let Some((_, picked_position)) = picked {
                        let last = triangle.sd_distance_exact(points, &picked_position)?;
                        let new = triangle.sd_distance_exact(points, &position)?;
                        match last.compare_to(new) {
                            Ordering::Equal => {
                                similar.push(node);
                                smaller = false;
                            }
                            Ordering::Greater => {}
                            Ordering::Less => smaller = false,
                        }
                    }
                }
                if smaller {
                    similar.clear();
                    upper_bound = distance + tolerance;
                    lower_bound = distance - tolerance;
                    picked = Some((node, position));
                }
            } else if triangle.orientation_to_upper_side(points, &position) == Orientation::DEGENERATE
                && triangle.circle_orientation(points, &position)? == InSphere::BOUNDARY
            {
                on_circle.push(node);
            }
        }
        Ok((picked.map(|(node, _)| node), similar, on_circle))
    }

    /// Triangulates the surface of the empty sphere through `nodes`, the nodes
    /// of `start` and `on_circle`, then cones every surface triangle from the
    /// node with the smallest id.
    fn triangulate_points_on_sphere<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        mut nodes: Vec<NodeKey>,
        mut on_circle: Vec<NodeKey>,
        start: TriangleKey,
    ) -> Result<(), TriangulationError> {
        let start_nodes = finite_nodes(mesh, start)?;
        for &node in start_nodes.iter().chain(on_circle.iter()) {
            push_unique(&mut nodes, node);
        }
        let mut map = EdgeMap::default();
        let mut surface = Vec::new();
        let mut open_edge = None;
        if on_circle.is_empty() {
            surface.push(start);
            for i in 0..3 {
                open_edge = put_edge_on_map(
                    mesh,
                    &mut map,
                    start_nodes[i],
                    start_nodes[(i + 1) % 3],
                    start_nodes[(i + 2) % 3],
                    open_edge,
                )?;
            }
        } else {
            for node in start_nodes {
                push_unique(&mut on_circle, node);
            }
            open_edge =
                self.triangulate_points_on_circle(mesh, on_circle, None, &mut map, &mut surface)?;
        }

        let limit = mesh.config.organizer_step_limit;
        let mut steps = 0;
        while !map.is_empty() {
            steps += 1;
            if steps > limit {
                warn!(steps, "cospherical triangulation exceeded its step limit");
                return Err(TriangulationError::RetriangulationStalled { steps });
            }
            let Some(edge) = open_edge.or_else(|| map.iter().next().copied()) else {
                break;
            };
            let (a, b) = (edge.endpoint_a(), edge.endpoint_b());
            let mut upper_bound = f64::MAX;
            let mut lower_bound = f64::MAX;
            let mut picked = None;
            let mut similar = Vec::new();
            for &node in &nodes {
                if node == a || node == b {
                    continue;
                }
                let cosine = edge.cosine(&mesh.position(node)?);
                if cosine < upper_bound {
                    if cosine > lower_bound {
                        similar.push(node);
                    } else {
                        picked = Some(node);
                        upper_bound = cosine + TIE_TOLERANCE;
                        lower_bound = cosine - TIE_TOLERANCE;
                        similar.clear();
                    }
                }
            }
            let Some(picked) = picked else {
                return Err(TriangulationError::topology(
                    "no node closes an open edge of a cospherical surface",
                ));
            };
            if similar.is_empty() {
                let triangle =
                    self.get_triangle_without_removing(mesh, Some(a), Some(b), Some(picked))?;
                push_unique(&mut surface, triangle);
                map.remove(&edge);
                open_edge = put_edge_on_map(mesh, &mut map, a, picked, b, None)?;
                open_edge = put_edge_on_map(mesh, &mut map, b, picked, a, open_edge)?;
            } else {
                similar.push(picked);
                open_edge = self.triangulate_points_on_circle(
                    mesh,
                    similar,
                    Some(edge),
                    &mut map,
                    &mut surface,
                )?;
            }
            if open_edge.is_none() {
                open_edge = map.iter().next().copied();
            }
        }

        let center = find_center_node(mesh, &nodes)?;
        for triangle in surface {
            if !mesh.triangle_ref(triangle)?.is_adjacent_to_node(Some(center)) {
                self.create_tetrahedron_from_triangle(mesh, triangle, Some(center))?;
            }
        }
        Ok(())
    }

    /// Triangulates cocircular nodes as a fan from the node with the smallest
    /// id. With `start_edge`, the fan starts at that edge of the surface
    /// triangulated so far.
    fn triangulate_points_on_circle<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        similar: Vec<NodeKey>,
        start_edge: Option<EdgeHashKey>,
        map: &mut EdgeMap,
        surface: &mut Vec<TriangleKey>,
    ) -> Result<Option<EdgeHashKey>, TriangulationError> {
        let mut candidates = similar.clone();
        if let Some(edge) = start_edge {
            candidates.push(edge.endpoint_a());
            candidates.push(edge.endpoint_b());
        }
        let center = find_center_node(mesh, &candidates)?;
        let sorted = sort_circle_nodes(mesh, similar, start_edge, center)?;
        self.remove_forbidden_triangles(mesh, &sorted)?;
        self.triangulate_sorted_circle_points(mesh, &sorted, center, map, surface)
    }

    /// Removes already-built triangles over the circle nodes that would cross
    /// the fan about to be built.
    fn remove_forbidden_triangles<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        sorted: &[NodeKey],
    ) -> Result<(), TriangulationError> {
        if let &[center, a, b, c] = sorted {
            let (center, a, b, c) = (Some(center), Some(a), Some(b), Some(c));
            if self.contains(mesh, center, a, b)? {
                if !self.contains(mesh, center, b, c)? {
                    self.remove_triangle_with_tetrahedra(mesh, center, a, b)?;
                }
            } else if self.contains(mesh, center, b, c)? {
                self.remove_triangle_with_tetrahedra(mesh, center, b, c)?;
            } else {
                if self.contains(mesh, a, b, c)? {
                    self.remove_triangle_with_tetrahedra(mesh, a, b, c)?;
                }
                if self.contains(mesh, center, a, c)? {
                    self.remove_triangle_with_tetrahedra(mesh, center, a, c)?;
                }
            }
            return Ok(());
        }

        let n = sorted.len();
        let mut fan_incomplete = false;
        for i in 1..n.saturating_sub(1) {
            if !self.contains(mesh, Some(sorted[0]), Some(sorted[i]), Some(sorted[i + 1]))? {
                fan_incomplete = true;
                break;
            }
        }
        if !fan_incomplete {
            return Ok(());
        }
        for i in 0..n.saturating_sub(2) {
            for j in i + 1..n - 1 {
                for k in j + 1..n {
                    let (a, b, c) = (Some(sorted[i]), Some(sorted[j]), Some(sorted[k]));
                    if self.contains(mesh, a, b, c)? {
                        self.remove_triangle_with_tetrahedra(mesh, a, b, c)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn remove_triangle_with_tetrahedra<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> Result<(), TriangulationError> {
        let triangle = self.get_triangle_without_removing(mesh, a, b, c)?;
        if let Some(Some(tetrahedron)) = mesh.triangle_ref(triangle)?.opposite_tetrahedron(None) {
            self.remove_all_tetrahedra_in_sphere(mesh, tetrahedron)?;
        }
        Ok(())
    }

    /// Builds the fan `center, sorted[i], sorted[i + 1]` and records its
    /// boundary edges.
    fn triangulate_sorted_circle_points<U>(
        &mut self,
        mesh: &mut Triangulation<U>,
        sorted: &[NodeKey],
        center: NodeKey,
        map: &mut EdgeMap,
        surface: &mut Vec<TriangleKey>,
    ) -> Result<Option<EdgeHashKey>, TriangulationError> {
        let mut open_edge = None;
        for pair in sorted.get(1..).unwrap_or_default().windows(2) {
            let (last, current) = (pair[0], pair[1]);
            let triangle =
                self.get_triangle_without_removing(mesh, Some(last), Some(current), Some(center))?;
            push_unique(surface, triangle);
            put_edge_on_map(mesh, map, center, last, current, None)?;
            open_edge = put_edge_on_map(mesh, map, last, current, center, open_edge)?;
            put_edge_on_map(mesh, map, current, center, last, None)?;
        }
        Ok(open_edge)
    }

    /// Starts a cavity with no open triangle at all (all tetrahedra around a
    /// removed node were infinite) from the first rim node, its nearest
    /// neighbour and the node whose circumcircle with them is smallest.
    fn create_initial_triangle<U>(&mut self, mesh: &mut Triangulation<U>) -> Result<(), TriangulationError> {
        let a = self
            .node_organizer
            .first_node()
            .ok_or_else(|| TriangulationError::topology("cavity without any node"))?;
        let av = mesh.position(a)?;
        let candidates: Vec<NodeKey> = self.node_organizer.nodes().filter(|&n| n != a).collect();

        let mut tolerance = TIE_TOLERANCE;
        let mut shortest = f64::MAX;
        let mut b: Option<NodeKey> = None;
        for &node in &candidates {
            let position = mesh.position(node)?;
            let distance = (position - av).norm_squared();
            if distance < shortest + tolerance {
                if distance > shortest - tolerance {
                    if let Some(current) = b {
                        let exact_a = ExactVector::from(av);
                        let new = exact_a.subtract(&ExactVector::from(position)).squared_length();
                        let last = exact_a
                            .subtract(&ExactVector::from(mesh.position(current)?))
                            .squared_length();
                        if last.compare_to(new) == Ordering::Greater {
                            b = Some(node);
                            shortest = shortest.min(distance);
                        }
                    }
                } else {
                    b = Some(node);
                    shortest = distance;
                    tolerance = TIE_TOLERANCE * distance;
                }
            }
        }
        let b = b.ok_or_else(|| TriangulationError::topology("cavity with a single node"))?;
        let bv = mesh.position(b)?;

        let normal_ab = bv - av;
        let offset_ab = 0.5 * normal_ab.dot(&(av + bv));
        let middle = (av + bv) * 0.5;
        let tolerance = normal_ab.norm_squared() * TIE_TOLERANCE;
        let mut shortest = f64::MAX;
        let mut c: Option<NodeKey> = None;
        for &node in candidates.iter().filter(|&&n| n != b) {
            let position = mesh.position(node)?;
            let a_to_node = position - av;
            let normal_plane = normal_ab.cross(&a_to_node);
            let center = three_plane_intersection(
                &[normal_ab, normal_plane, a_to_node],
                [
                    offset_ab,
                    normal_plane.dot(&av),
                    0.5 * a_to_node.dot(&(av + position)),
                ],
            );
            let distance = (center - middle).norm_squared();
            if distance < shortest + tolerance {
                if distance > shortest - tolerance {
                    if let Some(current) = c {
                        let new = calc_2d_sd_distance_exact(&av, &bv, &position)?;
                        let last = calc_2d_sd_distance_exact(&av, &bv, &mesh.position(current)?)?;
                        let comparison = new.compare_to(last);
                        if comparison == Ordering::Less
                            || (comparison == Ordering::Equal && mesh.id(node)? < mesh.id(current)?)
                        {
                            c = Some(node);
                            shortest = shortest.min(distance);
                        }
                    }
                } else {
                    c = Some(node);
                    shortest = distance;
                }
            }
        }
        let c = c.ok_or_else(|| TriangulationError::topology("all cavity nodes are collinear"))?;
        let triangle = mesh.create_triangle([Some(a), Some(b), Some(c)]);
        self.put_triangle(mesh, triangle)
    }
}

/// Flips the upper side of an open triangle so that it faces the open side.
///
/// A triangle facing an infinite tetrahedron keeps the orientation it was
/// given when its finite neighbour was removed.
fn orient_to_open_side<U>(
    mesh: &mut Triangulation<U>,
    open: TriangleKey,
    points: &TrianglePoints,
) -> Result<(), TriangulationError> {
    let neighbour = match mesh.triangle_ref(open)?.tetrahedra() {
        [Some(t), None] | [None, Some(t)] => t,
        _ => return Ok(()),
    };
    let neighbour = mesh.tetrahedron_ref(neighbour)?;
    if neighbour.is_infinite() {
        return Ok(());
    }
    let Some(Some(opposite)) = neighbour.opposite_node(open) else {
        return Ok(());
    };
    let position = mesh.position(opposite)?;
    let triangle = mesh.triangle_mut(open)?;
    if triangle.orient_to_side(points, &position) {
        triangle.flip_upper_side();
    }
    Ok(())
}

/// Toggles the edge `a`–`b`: an edge already on the map is closed by the
/// new triangle and leaves it; otherwise it is added. Returns the new edge,
/// or `old_open_edge` when the edge was closed.
fn put_edge_on_map<U>(
    mesh: &Triangulation<U>,
    map: &mut EdgeMap,
    a: NodeKey,
    b: NodeKey,
    opposite: NodeKey,
    old_open_edge: Option<EdgeHashKey>,
) -> Result<Option<EdgeHashKey>, TriangulationError> {
    let key = EdgeHashKey::new(
        (a, mesh.id(a)?, mesh.position(a)?),
        (b, mesh.id(b)?, mesh.position(b)?),
        mesh.position(opposite)?,
    );
    if map.remove(&key) {
        Ok(old_open_edge)
    } else {
        map.insert(key);
        Ok(Some(key))
    }
}

/// Exact squared distance between the circumcenter of `a`, `b`, `third` and
/// the midpoint of `a` and `b`.
///
/// # Errors
///
/// Propagates [`RationalError`] from the exact plane intersection.
pub fn calc_2d_sd_distance_exact(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    third: &Vector3<f64>,
) -> Result<Rational, RationalError> {
    let a = ExactVector::from(a);
    let b = ExactVector::from(b);
    let third = ExactVector::from(third);
    let a_to_third = third.subtract(&a);
    let ab = b.subtract(&a);
    let half = Rational::new(0.5);
    let normals = [ab, ab.cross(&a_to_third), a_to_third];
    let offsets = [
        normals[0].dot(&a.add(&b)).multiply(half),
        normals[1].dot(&a),
        normals[2].dot(&a.add(&third)).multiply(half),
    ];
    let center = three_plane_intersection_exact(&normals, offsets)?;
    Ok(center.subtract(&a.add(&b).multiply(half)).squared_length())
}

/// Orders cocircular nodes around the circle, starting with `start_edge` (or
/// the first node and its nearest neighbour), then rotates the order so that
/// `center` comes first.
fn sort_circle_nodes<U>(
    mesh: &Triangulation<U>,
    mut nodes: Vec<NodeKey>,
    start_edge: Option<EdgeHashKey>,
    center: NodeKey,
) -> Result<Vec<NodeKey>, TriangulationError> {
    let (mut last_search, mut search) = if let Some(edge) = start_edge {
        (edge.endpoint_a(), edge.endpoint_b())
    } else {
        if nodes.is_empty() {
            return Err(TriangulationError::topology("empty circle"));
        }
        let first = nodes.remove(0);
        let first_position = mesh.position(first)?;
        let mut nearest = None;
        let mut min_distance = f64::MAX;
        for (index, &node) in nodes.iter().enumerate() {
            let distance = (first_position - mesh.position(node)?).norm_squared();
            if distance < min_distance {
                min_distance = distance;
                nearest = Some(index);
            }
        }
        let nearest = nearest.ok_or_else(|| TriangulationError::topology("circle with one node"))?;
        (first, nodes.remove(nearest))
    };
    let prefix = [last_search, search];

    let mut sorted = VecDeque::with_capacity(nodes.len() + 2);
    while !nodes.is_empty() {
        let search_position = mesh.position(search)?;
        let last_vector = unit(search_position - mesh.position(last_search)?);
        let mut biggest_cosine = -2.0;
        let mut picked = None;
        for (index, &node) in nodes.iter().enumerate() {
            let cosine = unit(mesh.position(node)? - search_position).dot(&last_vector);
            if cosine > biggest_cosine {
                biggest_cosine = cosine;
                picked = Some(index);
            }
        }
        let Some(index) = picked else {
            break;
        };
        let node = nodes.remove(index);
        sorted.push_back(node);
        last_search = search;
        search = node;
    }
    sorted.extend(nodes);
    sorted.push_front(prefix[1]);
    sorted.push_front(prefix[0]);

    let mut rotated = Vec::new();
    while let Some(&front) = sorted.front() {
        if front == center {
            break;
        }
        sorted.pop_front();
        rotated.push(front);
    }
    sorted.extend(rotated);
    Ok(Vec::from(sorted))
}

/// The node with the smallest id.
fn find_center_node<U>(mesh: &Triangulation<U>, nodes: &[NodeKey]) -> Result<NodeKey, TriangulationError> {
    let mut center = None;
    let mut min_id = u64::MAX;
    for &node in nodes {
        let id = mesh.id(node)?;
        if id < min_id {
            min_id = id;
            center = Some(node);
        }
    }
    center.ok_or_else(|| TriangulationError::topology("no node to cone from"))
}

fn finite_nodes<U>(mesh: &Triangulation<U>, triangle: TriangleKey) -> Result<[NodeKey; 3], TriangulationError> {
    match mesh.triangle_ref(triangle)?.nodes() {
        [Some(a), Some(b), Some(c)] => Ok([a, b, c]),
        _ => Err(TriangulationError::topology(format!(
            "triangle {triangle:?} is infinite"
        ))),
    }
}

fn push_unique<T: PartialEq>(values: &mut Vec<T>, value: T) {
    if !values.contains(&value) {
        values.push(value);
    }
}

#[inline]
fn unit(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(0.0).unwrap_or_else(Vector3::zeros)
}
