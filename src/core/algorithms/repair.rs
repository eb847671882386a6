//! Moving nodes and restoring the Delaunay property.
//!
//! A move that keeps every incident tetrahedron positively oriented is handled
//! locally: the node is shifted in place and [`restore_delaunay`] flips the
//! tetrahedra around it until no circumsphere contains a neighbouring vertex.
//! Any other move removes the node and reinserts it at the target.
//!
//! Flips are tried in the order 3→2, flat-pair collapse, 2→3. Whatever the
//! flips leave broken (flat tetrahedra, or pairs no flip applies to) is cut out
//! and retriangulated by the clean-up phase.
//!
//! [`restore_delaunay`]: Triangulation::restore_delaunay

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::core::collections::{FastHashMap, TetrahedronBuffer, remove_first};
use crate::core::open_triangle_organizer::OpenTriangleOrganizer;
use crate::core::triangulation::{NodeKey, TetrahedronKey, Triangulation, TriangulationError};
use crate::geometry::plane::Plane;
use crate::geometry::predicates::Orientation;

/// Set to any value to log every flip performed while restoring the Delaunay
/// property.
pub const REPAIR_TRACE_ENV: &str = "SPATIAL_ORGANIZATION_REPAIR_TRACE";

/// Role of a tetrahedron during one pass of [`Triangulation::restore_delaunay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    /// Queued for checking against its neighbours.
    Active,
    /// Violates the Delaunay criterion with a neighbour no flip could fix.
    Problem,
    /// Produced flat by a flip.
    Flat,
    /// Consumed by a flip.
    Removed,
}

#[derive(Debug, Default)]
struct RepairWorklist {
    active: VecDeque<TetrahedronKey>,
    problem: Vec<TetrahedronKey>,
    flat: Vec<TetrahedronKey>,
    states: FastHashMap<TetrahedronKey, RepairState>,
}

impl RepairWorklist {
    fn activate(&mut self, tetrahedron: TetrahedronKey) {
        self.active.push_back(tetrahedron);
        self.states.entry(tetrahedron).or_insert(RepairState::Active);
    }

    fn mark(&mut self, tetrahedron: TetrahedronKey, state: RepairState) {
        let previous = self.states.insert(tetrahedron, state);
        if previous == Some(state) {
            return;
        }
        match state {
            RepairState::Problem => self.problem.push(tetrahedron),
            RepairState::Flat => self.flat.push(tetrahedron),
            RepairState::Active | RepairState::Removed => {}
        }
    }

    fn is_removed(&self, tetrahedron: TetrahedronKey) -> bool {
        self.states.get(&tetrahedron) == Some(&RepairState::Removed)
    }

    fn start_pass(&mut self) {
        self.problem.clear();
        self.flat.clear();
        self.states.clear();
        for &tetrahedron in &self.active {
            self.states.insert(tetrahedron, RepairState::Active);
        }
    }
}

impl<U> Triangulation<U> {
    // =========================================================================
    // MOVEMENT
    // =========================================================================

    /// Moves `node` to `new_position`.
    ///
    /// # Errors
    ///
    /// - [`TriangulationError::PositionNotAllowed`] if another node occupies
    ///   `new_position`. The mesh and the node are unchanged.
    /// - [`TriangulationError::DegenerateInitialSimplex`] if the mesh has four
    ///   nodes and the target is coplanar with the other three.
    /// - [`TriangulationError::CycleDetected`] if locating the target does not
    ///   terminate.
    pub fn move_to(
        &mut self,
        node: NodeKey,
        new_position: impl Into<Vector3<f64>>,
    ) -> Result<(), TriangulationError> {
        let new_position = new_position.into();
        for neighbour in self.neighbor_nodes(node)? {
            if self.position(neighbour)? == new_position {
                return Err(TriangulationError::PositionNotAllowed {
                    position: new_position.into(),
                    node: neighbour,
                    suggestion: self.propose_new_position(neighbour)?.into(),
                });
            }
        }
        let result = if self.tetrahedra.is_empty() {
            self.move_locally(node, new_position, false)
        } else if self.nodes.len() == 4 {
            self.move_initial_tetrahedron_node(node, new_position)
        } else if self.check_if_triangulation_is_still_valid(node, &new_position)? {
            tracing::debug!(node = ?node, "moving node locally");
            self.move_locally(node, new_position, true)
        } else {
            tracing::debug!(node = ?node, "moving node by reinsertion");
            self.move_by_reinsertion(node, new_position)
        };
        self.collect_orphaned_triangles();
        result
    }

    /// Moves `node` by `delta`.
    ///
    /// # Errors
    ///
    /// See [`move_to`](Self::move_to).
    pub fn move_from(
        &mut self,
        node: NodeKey,
        delta: impl Into<Vector3<f64>>,
    ) -> Result<(), TriangulationError> {
        let target = self.position(node)? + delta.into();
        self.move_to(node, target)
    }

    fn move_locally(
        &mut self,
        node: NodeKey,
        new_position: Vector3<f64>,
        restore: bool,
    ) -> Result<(), TriangulationError> {
        let listeners = self.node_ref(node)?.listeners.clone();
        let delta = new_position - self.position(node)?;
        {
            let space_node = self.node_ref(node)?;
            for listener in &listeners {
                listener.node_about_to_move(space_node, &delta);
            }
        }
        self.node_mut(node)?.set_position(new_position);
        if restore {
            self.restore_delaunay(node)?;
        }
        let space_node = self.node_ref(node)?;
        for listener in &listeners {
            listener.node_moved(space_node);
        }
        Ok(())
    }

    /// With a single finite tetrahedron the mesh is rebuilt around the target.
    fn move_initial_tetrahedron_node(
        &mut self,
        node: NodeKey,
        new_position: Vector3<f64>,
    ) -> Result<(), TriangulationError> {
        let others: Vec<NodeKey> = self.nodes.keys().filter(|&n| n != node).collect();
        let [a, b, c] = others[..] else {
            return Err(TriangulationError::topology("initial tetrahedron without four nodes"));
        };
        let seeds = [self.position(a)?, self.position(b)?, self.position(c)?];
        if Plane::simplex_side(&seeds, &new_position) == Orientation::DEGENERATE {
            return Err(TriangulationError::DegenerateInitialSimplex);
        }
        let listeners = self.node_ref(node)?.listeners.clone();
        let delta = new_position - self.position(node)?;
        {
            let space_node = self.node_ref(node)?;
            for listener in &listeners {
                listener.node_about_to_move(space_node, &delta);
            }
        }
        self.clear_mesh()?;
        self.node_mut(node)?.set_position(new_position);
        self.create_initial_tetrahedron([a, b, c, node])?;
        let space_node = self.node_ref(node)?;
        for listener in &listeners {
            listener.node_moved(space_node);
        }
        tracing::debug!(node = ?node, "rebuilt initial tetrahedron");
        Ok(())
    }

    fn move_by_reinsertion(
        &mut self,
        node: NodeKey,
        new_position: Vector3<f64>,
    ) -> Result<(), TriangulationError> {
        let start = self
            .node_ref(node)?
            .adjacent_tetrahedra()
            .first()
            .copied()
            .ok_or_else(|| TriangulationError::topology(format!("{node:?} is not part of the mesh")))?;
        let located = self.search_initial_insertion_tetrahedron(start, &new_position)?;
        let witness = self.remove_and_return_created_tetrahedron(node)?;
        let start = if self.tetrahedra.contains_key(located) {
            located
        } else {
            witness.ok_or_else(|| TriangulationError::topology("removal created no tetrahedron"))?
        };
        let old_position = self.position(node)?;
        self.node_mut(node)?.set_position(new_position);
        match self.insert(node, start) {
            Ok(_) => Ok(()),
            Err(refused @ TriangulationError::PositionNotAllowed { .. }) => {
                tracing::debug!(node = ?node, "target refused, reinserting at the old position");
                self.node_mut(node)?.set_position(old_position);
                let start = self
                    .tetrahedra
                    .keys()
                    .next()
                    .ok_or_else(|| TriangulationError::topology("mesh without tetrahedra"))?;
                self.insert(node, start)?;
                Err(refused)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether moving `node` to `new_position` leaves every incident
    /// tetrahedron valid, so that flips around the node suffice.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::PositionNotAllowed`] when `new_position` coincides
    /// with a vertex of an incident tetrahedron.
    pub fn check_if_triangulation_is_still_valid(
        &self,
        node: NodeKey,
        new_position: &Vector3<f64>,
    ) -> Result<bool, TriangulationError> {
        let position = self.position(node)?;
        for &tetrahedron in self.node_ref(node)?.adjacent_tetrahedra() {
            let tet = self.tetrahedron_ref(tetrahedron)?;
            if tet.is_flat() {
                return Ok(false);
            }
            if tet.is_infinite() {
                let inner = self.adjacent_tetrahedron(tetrahedron, 0)?.ok_or_else(|| {
                    TriangulationError::topology("hull face with a single tetrahedron")
                })?;
                for slot in 0..4 {
                    match self.adjacent_tetrahedron(inner, slot)? {
                        Some(neighbour) if self.is_infinite_tetrahedron(neighbour)? => {}
                        _ => return Ok(false),
                    }
                }
                return Ok(true);
            }
            let triangle = tet.opposite_triangle(Some(node)).ok_or_else(|| {
                TriangulationError::topology(format!("{node:?} is not a vertex of {tetrahedron:?}"))
            })?;
            let points = self.finite_triangle_points(triangle)?;
            if !self
                .triangle_ref(triangle)?
                .truly_on_same_side(&points, &position, new_position)
            {
                self.test_position(tetrahedron, new_position)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // DELAUNAY RESTORATION
    // =========================================================================

    /// Flips the tetrahedra around `node`, which has just moved, until the
    /// Delaunay criterion holds again.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::RetriangulationStalled`] if a clean-up cavity
    /// cannot be closed.
    pub fn restore_delaunay(&mut self, node: NodeKey) -> Result<(), TriangulationError> {
        let trace_flips = std::env::var_os(REPAIR_TRACE_ENV).is_some();
        let mut work = RepairWorklist::default();
        for tetrahedron in self.node_ref(node)?.adjacent_tetrahedra().to_vec() {
            self.update_circum_sphere_after_node_movement(tetrahedron, node)?;
            work.activate(tetrahedron);
        }
        let limit = self.config.repair_step_limit;
        let mut steps = 0;
        while !work.active.is_empty() {
            let checking_index = self.next_checking_index();
            work.start_pass();
            while let Some(tetrahedron) = work.active.pop_front() {
                if steps >= limit {
                    tracing::warn!(steps, "Delaunay restoration exceeded its step limit");
                    work.active.clear();
                    break;
                }
                steps += 1;
                if work.is_removed(tetrahedron) || !self.tetrahedra.contains_key(tetrahedron) {
                    continue;
                }
                self.repair_tetrahedron(tetrahedron, checking_index, &mut work, trace_flips)?;
            }
            let messed_up = self.messed_up_tetrahedra(&work)?;
            if !messed_up.is_empty() {
                self.clean_up(&messed_up)?;
            }
        }
        Ok(())
    }

    /// Checks `tetrahedron` against each neighbour and applies the first
    /// applicable flip.
    fn repair_tetrahedron(
        &mut self,
        tetrahedron: TetrahedronKey,
        checking_index: i64,
        work: &mut RepairWorklist,
        trace_flips: bool,
    ) -> Result<(), TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        let (triangles, nodes) = (tet.triangles(), tet.nodes());
        let first = usize::from(tet.is_infinite());
        for i in first..4 {
            if self.triangle_mut(triangles[i])?.was_checked_already(checking_index) {
                continue;
            }
            let Some(tet_i) = self.tetrahedron_across(triangles[i], Some(tetrahedron))? else {
                continue;
            };
            let Some(Some(node_i)) = self.tetrahedron_ref(tet_i)?.opposite_node(triangles[i]) else {
                continue;
            };
            let flat = self.tetrahedron_ref(tetrahedron)?.is_flat();
            let flat_i = self.tetrahedron_ref(tet_i)?.is_flat();
            if !(self.is_truly_inside_sphere(tetrahedron, &self.position(node_i)?)? || (flat && flat_i)) {
                continue;
            }

            let mut created = TetrahedronBuffer::new();
            for j in (first..4).filter(|&j| j != i) {
                let Some(tet_j) = self.tetrahedron_across(triangles[j], Some(tetrahedron))? else {
                    continue;
                };
                if tet_j == tet_i
                    || !self.tetrahedra.contains_key(tet_j)
                    || !self.is_neighbor(tet_j, tet_i)?
                {
                    continue;
                }
                let (Some(opp_i), Some(opp_j)) = (nodes[i], nodes[j]) else {
                    continue;
                };
                let all_flat = flat && flat_i && self.tetrahedron_ref(tet_j)?.is_flat();
                if all_flat
                    || (self.is_truly_inside_sphere(tet_j, &self.position(opp_j)?)?
                        && self.is_truly_inside_sphere(tet_i, &self.position(opp_i)?)?)
                {
                    match self.flip3to2(tetrahedron, tet_i, tet_j) {
                        Ok(pair) => {
                            created.extend(pair);
                            work.mark(tet_j, RepairState::Removed);
                            break;
                        }
                        Err(TriangulationError::DegenerateFlipRejected { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if created.is_empty() {
                if flat && flat_i && self.tetrahedron_ref(tetrahedron)?.is_adjacent_to(Some(node_i)) {
                    match self.remove_2_flat_tetrahedra(tetrahedron, tet_i) {
                        Ok(adjacent) => created = adjacent,
                        Err(TriangulationError::DegenerateFlipRejected { .. }) => {}
                        Err(e) => return Err(e),
                    }
                } else if !(flat || flat_i) {
                    match self.flip2to3(tetrahedron, tet_i) {
                        Ok(Some(three)) => created.extend(three),
                        Ok(None) | Err(TriangulationError::DegenerateFlipRejected { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if created.is_empty() {
                work.mark(tetrahedron, RepairState::Problem);
                work.mark(tet_i, RepairState::Problem);
                work.active.push_back(tet_i);
                continue;
            }
            if trace_flips {
                tracing::debug!(
                    tetrahedron = ?tetrahedron,
                    neighbour = ?tet_i,
                    created = created.len(),
                    "flipped"
                );
            }
            work.mark(tetrahedron, RepairState::Removed);
            work.mark(tet_i, RepairState::Removed);
            for new in created {
                if !self.tetrahedra.contains_key(new) {
                    continue;
                }
                work.activate(new);
                if self.tetrahedron_ref(new)?.is_flat() {
                    work.mark(new, RepairState::Flat);
                }
            }
            break;
        }
        Ok(())
    }

    /// Flat survivors with all their neighbours, plus problem tetrahedra that
    /// still contain the opposite vertex of a finite neighbour.
    fn messed_up_tetrahedra(&self, work: &RepairWorklist) -> Result<Vec<TetrahedronKey>, TriangulationError> {
        let mut messed_up = Vec::new();
        for &flat in &work.flat {
            let Some(tet) = self.tetrahedra.get(flat) else {
                continue;
            };
            if messed_up.contains(&flat) {
                continue;
            }
            for triangle in tet.triangles() {
                if let Some(opposite) = self.tetrahedron_across(triangle, Some(flat))? {
                    if !messed_up.contains(&opposite) {
                        messed_up.push(opposite);
                    }
                }
            }
            if !messed_up.contains(&flat) {
                messed_up.push(flat);
            }
        }
        for &problem in &work.problem {
            let Some(tet) = self.tetrahedra.get(problem) else {
                continue;
            };
            if tet.is_flat() || messed_up.contains(&problem) {
                continue;
            }
            for triangle in tet.triangles() {
                let Some(opposite) = self.tetrahedron_across(triangle, Some(problem))? else {
                    continue;
                };
                let opposite_tet = self.tetrahedron_ref(opposite)?;
                if opposite_tet.is_infinite() {
                    continue;
                }
                if let Some(Some(node)) = opposite_tet.opposite_node(triangle) {
                    if self.is_truly_inside_sphere(problem, &self.position(node)?)? {
                        messed_up.push(problem);
                        break;
                    }
                }
            }
        }
        Ok(messed_up)
    }

    /// Cuts out `messed_up` together with every outer tetrahedron that is flat
    /// or whose sphere contains one of the cut-out nodes, then retriangulates
    /// the hole.
    fn clean_up(&mut self, messed_up: &[TetrahedronKey]) -> Result<(), TriangulationError> {
        tracing::debug!(tetrahedra = messed_up.len(), "cleaning up after flips");
        let mut organizer = OpenTriangleOrganizer::new();
        let mut outer = Vec::new();
        let mut problem_nodes = Vec::new();
        for &tetrahedron in messed_up {
            if self.tetrahedra.contains_key(tetrahedron) {
                self.remove_tetrahedron_during_clean_up(
                    tetrahedron,
                    &mut outer,
                    &mut problem_nodes,
                    &mut organizer,
                )?;
                remove_first(&mut outer, &tetrahedron);
            }
        }
        loop {
            let mut stripped = None;
            'search: for &candidate in &outer {
                let Some(tet) = self.tetrahedra.get(candidate) else {
                    continue;
                };
                for &node in &problem_nodes {
                    if !tet.is_adjacent_to(Some(node))
                        && (tet.is_flat() || self.is_inside_sphere(candidate, &self.position(node)?)?)
                    {
                        stripped = Some(candidate);
                        break 'search;
                    }
                }
            }
            let Some(candidate) = stripped else {
                break;
            };
            self.remove_tetrahedron_during_clean_up(
                candidate,
                &mut outer,
                &mut problem_nodes,
                &mut organizer,
            )?;
            remove_first(&mut outer, &candidate);
        }
        organizer.triangulate(self)
    }

    fn remove_tetrahedron_during_clean_up(
        &mut self,
        tetrahedron: TetrahedronKey,
        outer: &mut Vec<TetrahedronKey>,
        problem_nodes: &mut Vec<NodeKey>,
        organizer: &mut OpenTriangleOrganizer,
    ) -> Result<(), TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        let (nodes, triangles) = (tet.nodes(), tet.triangles());
        for node in nodes.into_iter().flatten() {
            if !problem_nodes.contains(&node) {
                problem_nodes.push(node);
            }
        }
        for triangle in triangles {
            if let Some(opposite) = self.tetrahedron_across(triangle, Some(tetrahedron))? {
                if !outer.contains(&opposite) {
                    outer.push(opposite);
                }
            }
        }
        self.remove_tetrahedron(tetrahedron)?;
        for triangle in triangles {
            if self.triangle_ref(triangle)?.is_completely_open() {
                organizer.remove_triangle(self, triangle)?;
            } else {
                organizer.put_triangle(self, triangle)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::listener::NodeMovementListener;
    use crate::core::node::SpaceNode;
    use crate::core::util::validation::{is_delaunay, validate_topology};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLOUD: [[f64; 3]; 12] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.9, 0.8, 0.7],
        [0.31, 0.27, 0.22],
        [0.62, 0.11, 0.45],
        [0.14, 0.58, 0.36],
        [0.47, 0.49, 0.12],
        [0.22, 0.19, 0.71],
        [0.75, 0.33, 0.05],
        [0.05, 0.83, 0.81],
    ];

    fn cloud() -> (Triangulation<usize>, Vec<NodeKey>) {
        let mut mesh = Triangulation::new();
        let keys = CLOUD
            .iter()
            .enumerate()
            .map(|(i, &p)| mesh.insert_node(p, i).unwrap())
            .collect();
        (mesh, keys)
    }

    fn assert_valid(mesh: &Triangulation<usize>) {
        validate_topology(mesh).unwrap();
        assert!(is_delaunay(mesh).unwrap());
    }

    #[test]
    fn test_small_move_is_local() {
        let (mut mesh, keys) = cloud();
        let target = Vector3::new(0.312, 0.27, 0.219);
        assert!(mesh.check_if_triangulation_is_still_valid(keys[5], &target).unwrap());
        mesh.move_to(keys[5], target).unwrap();
        assert_eq!(mesh.position(keys[5]).unwrap(), target);
        assert_valid(&mesh);
    }

    #[test]
    fn test_far_move_reinserts() {
        let (mut mesh, keys) = cloud();
        let target = Vector3::new(2.0, 2.0, 2.0);
        assert!(!mesh.check_if_triangulation_is_still_valid(keys[5], &target).unwrap());
        mesh.move_to(keys[5], target).unwrap();
        assert_eq!(mesh.position(keys[5]).unwrap(), target);
        assert_eq!(mesh.number_of_nodes(), CLOUD.len());
        assert!(!mesh.adjacent_tetrahedra(keys[5]).unwrap().is_empty());
        assert_valid(&mesh);
    }

    #[test]
    fn test_round_trip_keeps_triangulation() {
        let (mut mesh, keys) = cloud();
        let finite = mesh.number_of_finite_tetrahedra();
        let original = mesh.position(keys[7]).unwrap();
        mesh.move_to(keys[7], [0.5, 0.4, 0.3]).unwrap();
        assert_valid(&mesh);
        mesh.move_to(keys[7], original).unwrap();
        assert_valid(&mesh);
        assert_eq!(mesh.number_of_finite_tetrahedra(), finite);
    }

    #[test]
    fn test_move_onto_neighbour_is_refused() {
        let (mut mesh, keys) = cloud();
        let neighbour = mesh.neighbor_nodes(keys[5]).unwrap()[0];
        let occupied = mesh.position(neighbour).unwrap();
        let before = (mesh.number_of_tetrahedra(), mesh.number_of_edges());
        let result = mesh.move_to(keys[5], occupied);
        assert!(matches!(
            result,
            Err(TriangulationError::PositionNotAllowed { node, .. }) if node == neighbour
        ));
        assert_eq!(mesh.position(keys[5]).unwrap(), Vector3::from(CLOUD[5]));
        assert_eq!((mesh.number_of_tetrahedra(), mesh.number_of_edges()), before);
        assert_valid(&mesh);
    }

    #[test]
    fn test_move_from_adds_delta() {
        let (mut mesh, keys) = cloud();
        mesh.move_from(keys[8], [0.01, -0.02, 0.03]).unwrap();
        approx::assert_relative_eq!(
            mesh.position(keys[8]).unwrap(),
            Vector3::new(0.48, 0.47, 0.15),
            epsilon = 1e-12
        );
        assert_valid(&mesh);
    }

    #[test]
    fn test_initial_tetrahedron_move() {
        let mut mesh: Triangulation<usize> = Triangulation::new();
        let keys: Vec<_> = CLOUD[..4]
            .iter()
            .enumerate()
            .map(|(i, &p)| mesh.insert_node(p, i).unwrap())
            .collect();
        mesh.move_to(keys[3], [0.2, 0.2, 2.0]).unwrap();
        assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
        assert_eq!(mesh.number_of_tetrahedra(), 5);
        validate_topology(&mesh).unwrap();
        approx::assert_relative_eq!(mesh.volume(keys[3]).unwrap(), 2.0 / 6.0 / 4.0, epsilon = 1e-12);

        assert_eq!(
            mesh.move_to(keys[3], [0.5, 0.5, 0.0]),
            Err(TriangulationError::DegenerateInitialSimplex)
        );
        assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
    }

    #[test]
    fn test_bootstrap_move() {
        let mut mesh: Triangulation<usize> = Triangulation::new();
        let a = mesh.insert_node([0.0, 0.0, 0.0], 0).unwrap();
        mesh.insert_node([1.0, 0.0, 0.0], 1).unwrap();
        mesh.move_to(a, [0.0, 3.0, 0.0]).unwrap();
        assert_eq!(mesh.position(a).unwrap(), Vector3::new(0.0, 3.0, 0.0));
        assert_eq!(mesh.number_of_edges(), 1);
    }

    #[derive(Default)]
    struct MoveCounter {
        about_to_move: AtomicUsize,
        moved: AtomicUsize,
    }

    impl NodeMovementListener<usize> for MoveCounter {
        fn node_about_to_move(&self, _node: &SpaceNode<usize>, _delta: &Vector3<f64>) {
            self.about_to_move.fetch_add(1, Ordering::SeqCst);
        }

        fn node_moved(&self, _node: &SpaceNode<usize>) {
            self.moved.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_local_move_notifies_listeners() {
        let (mut mesh, keys) = cloud();
        let counter = Arc::new(MoveCounter::default());
        mesh.add_listener(keys[5], counter.clone()).unwrap();
        mesh.move_from(keys[5], [0.001, 0.0, 0.0]).unwrap();
        assert_eq!(counter.about_to_move.load(Ordering::SeqCst), 1);
        assert_eq!(counter.moved.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worklist_deduplicates_marks() {
        let mut mesh: Triangulation<usize> = Triangulation::new();
        for (i, &p) in CLOUD[..4].iter().enumerate() {
            mesh.insert_node(p, i).unwrap();
        }
        let tet = mesh.tetrahedra().next().unwrap().0;
        let mut work = RepairWorklist::default();
        work.activate(tet);
        work.mark(tet, RepairState::Problem);
        work.mark(tet, RepairState::Problem);
        assert_eq!(work.problem, vec![tet]);
        work.mark(tet, RepairState::Removed);
        assert!(work.is_removed(tet));
        work.start_pass();
        assert!(work.problem.is_empty());
        assert!(!work.is_removed(tet));
    }

    fn with_payloads(mesh: &Triangulation<usize>, payloads: [usize; 4]) -> TetrahedronKey {
        mesh.tetrahedra()
            .find(|(k, t)| {
                !t.is_infinite()
                    && mesh
                        .vertex_payloads(*k)
                        .unwrap()
                        .iter()
                        .all(|p| p.is_some_and(|p| payloads.contains(p)))
            })
            .unwrap()
            .0
    }

    #[test]
    fn test_clean_up_of_flat_survivors_restores_delaunay() {
        // T, P, Q, R, S, B: a rhombus in z = 0 with one apex on each side
        let points = [
            [0.0, 0.0, 2.0],
            [0.8, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [-0.8, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, -2.0],
        ];
        let mut mesh: Triangulation<usize> = Triangulation::new();
        for (i, &p) in points.iter().enumerate() {
            mesh.insert_node(p, i).unwrap();
        }
        for pair in [[[0, 1, 2, 3], [1, 2, 3, 5]], [[0, 1, 3, 4], [1, 3, 4, 5]]] {
            let [a, b] = pair.map(|set| with_payloads(&mesh, set));
            mesh.flip2to3(a, b).unwrap().unwrap();
        }
        let flat: Vec<_> = mesh.tetrahedra().filter(|(_, t)| t.is_flat()).map(|(k, _)| k).collect();
        assert_eq!(flat.len(), 2);

        let mut work = RepairWorklist::default();
        for &f in &flat {
            work.mark(f, RepairState::Flat);
        }
        let messed_up = mesh.messed_up_tetrahedra(&work).unwrap();
        assert!(flat.iter().all(|f| messed_up.contains(f)));
        assert!(messed_up.len() > flat.len());

        mesh.clean_up(&messed_up).unwrap();
        mesh.collect_orphaned_triangles();
        assert!(mesh.tetrahedra().all(|(_, t)| !t.is_flat()));
        assert_eq!(mesh.number_of_finite_tetrahedra(), 4);
        assert_valid(&mesh);
    }

    #[test]
    fn test_clean_up_of_a_delaunay_tetrahedron_rebuilds_it() {
        let (mut mesh, keys) = cloud();
        let finite = mesh.number_of_finite_tetrahedra();
        let tet = mesh
            .adjacent_tetrahedra(keys[5])
            .unwrap()
            .iter()
            .copied()
            .find(|&t| !mesh.tetrahedron(t).unwrap().is_infinite())
            .unwrap();
        let work = RepairWorklist::default();
        assert!(mesh.messed_up_tetrahedra(&work).unwrap().is_empty());
        mesh.clean_up(&[tet]).unwrap();
        mesh.collect_orphaned_triangles();
        assert_eq!(mesh.number_of_finite_tetrahedra(), finite);
        assert_valid(&mesh);
    }

    #[test]
    fn test_lowered_organizer_limit_stalls_clean_up() {
        let config = crate::geometry::config::TriangulationConfig {
            organizer_step_limit: 0,
            ..crate::geometry::config::config_presets::strict_limits()
        };
        let mut mesh: Triangulation<usize> = Triangulation::with_config(config);
        for (i, &p) in CLOUD[..6].iter().enumerate() {
            mesh.insert_node(p, i).unwrap();
        }
        let tet = mesh.tetrahedra().find(|(_, t)| !t.is_infinite()).unwrap().0;
        assert!(matches!(
            mesh.clean_up(&[tet]),
            Err(TriangulationError::RetriangulationStalled { .. })
        ));
    }
}
