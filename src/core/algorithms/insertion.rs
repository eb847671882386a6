//! Node insertion.
//!
//! Until four nodes exist there is no mesh: the first three nodes are joined by
//! plain edges and the fourth one turns them into the initial tetrahedron,
//! closed off by four infinite tetrahedra. Every later node is inserted with
//! Bowyer–Watson. The tetrahedra whose circumsphere strictly contains the new
//! point are cut out and the resulting star-shaped cavity is coned from it.

use nalgebra::Vector3;

use crate::core::listener::SharedListener;
use crate::core::node::SpaceNode;
use crate::core::open_triangle_organizer::OpenTriangleOrganizer;
use crate::core::triangulation::{NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError};
use crate::geometry::plane::Plane;
use crate::geometry::predicates::Orientation;

impl<U> Triangulation<U> {
    /// Inserts a node at `position`.
    ///
    /// # Errors
    ///
    /// - [`TriangulationError::PositionNotAllowed`] if a node already occupies
    ///   `position`.
    /// - [`TriangulationError::DegenerateInitialSimplex`] if this would be the
    ///   fourth node and it is coplanar with the first three.
    /// - [`TriangulationError::CycleDetected`] if point location does not
    ///   terminate.
    ///
    /// The mesh is unchanged on error.
    pub fn insert_node(
        &mut self,
        position: impl Into<Vector3<f64>>,
        payload: U,
    ) -> Result<NodeKey, TriangulationError> {
        self.insert_node_from(None, position.into(), payload)
    }

    /// Inserts a node at `position`, starting point location at `near`.
    ///
    /// The new node inherits the listeners of `near`.
    ///
    /// # Errors
    ///
    /// As [`insert_node`](Self::insert_node), plus
    /// [`TriangulationError::NodeNotFound`] for a stale `near`.
    pub fn insert_node_near(
        &mut self,
        near: NodeKey,
        position: impl Into<Vector3<f64>>,
        payload: U,
    ) -> Result<NodeKey, TriangulationError> {
        self.insert_node_from(Some(near), position.into(), payload)
    }

    fn insert_node_from(
        &mut self,
        near: Option<NodeKey>,
        position: Vector3<f64>,
        payload: U,
    ) -> Result<NodeKey, TriangulationError> {
        let listeners = match near {
            Some(near) => self.node_ref(near)?.listeners.clone(),
            None => Vec::new(),
        };
        if self.tetrahedra.is_empty() {
            return self.insert_bootstrap_node(position, payload, listeners);
        }

        let start = near
            .and_then(|n| self.nodes.get(n))
            .and_then(|n| n.adjacent_tetrahedra().first().copied())
            .or_else(|| self.tetrahedra.keys().next())
            .ok_or_else(|| TriangulationError::topology("mesh without tetrahedra"))?;
        let located = self.search_initial_insertion_tetrahedron(start, &position)?;

        let mut node = SpaceNode::new(position, payload);
        node.listeners = listeners;
        let key = self.nodes.insert(node);
        let result = self.insert(key, located);
        self.collect_orphaned_triangles();
        match result {
            Ok(_) => {
                tracing::debug!(node = ?key, "inserted node");
                Ok(key)
            }
            Err(e) => {
                if self.nodes.get(key).is_some_and(|n| n.adjacent_tetrahedra().is_empty()) {
                    self.nodes.remove(key);
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    fn insert_bootstrap_node(
        &mut self,
        position: Vector3<f64>,
        payload: U,
        listeners: Vec<SharedListener<U>>,
    ) -> Result<NodeKey, TriangulationError> {
        for (key, existing) in &self.nodes {
            if existing.position() == position {
                return Err(TriangulationError::PositionNotAllowed {
                    position: position.into(),
                    node: key,
                    suggestion: self.propose_new_position(key)?.into(),
                });
            }
        }
        let existing: Vec<NodeKey> = self.nodes.keys().collect();
        let [a, b, c] = existing[..] else {
            if existing.len() > 3 {
                return Err(TriangulationError::topology(
                    "more than three nodes without a mesh",
                ));
            }
            let mut node = SpaceNode::new(position, payload);
            node.listeners = listeners;
            let key = self.nodes.insert(node);
            for other in existing {
                self.create_edge(other, key)?;
            }
            return Ok(key);
        };

        let seeds = [self.position(a)?, self.position(b)?, self.position(c)?];
        if Plane::simplex_side(&seeds, &position) == Orientation::DEGENERATE {
            tracing::debug!(?position, "refused coplanar fourth node");
            return Err(TriangulationError::DegenerateInitialSimplex);
        }
        let mut node = SpaceNode::new(position, payload);
        node.listeners = listeners;
        let key = self.nodes.insert(node);
        let edges: Vec<_> = self.edges.keys().collect();
        for edge in edges {
            self.dissolve_edge(edge);
        }
        self.create_initial_tetrahedron([a, b, c, key])?;
        self.collect_orphaned_triangles();
        tracing::debug!(node = ?key, "built initial tetrahedron");
        Ok(key)
    }

    /// Builds the first finite tetrahedron over four non-coplanar nodes and the
    /// four infinite tetrahedra closing its faces.
    pub(crate) fn create_initial_tetrahedron(
        &mut self,
        [a, b, c, d]: [NodeKey; 4],
    ) -> Result<TetrahedronKey, TriangulationError> {
        let faces = [
            self.create_triangle([Some(b), Some(c), Some(d)]),
            self.create_triangle([Some(a), Some(c), Some(d)]),
            self.create_triangle([Some(a), Some(b), Some(d)]),
            self.create_triangle([Some(a), Some(b), Some(c)]),
        ];
        let initial =
            self.create_tetrahedron_from_parts(faces, [Some(a), Some(b), Some(c), Some(d)], false)?;
        let mut organizer = OpenTriangleOrganizer::new();
        for face in faces {
            organizer.create_tetrahedron_from_triangle(self, face, None)?;
        }
        Ok(initial)
    }

    // =========================================================================
    // BOWYER-WATSON
    // =========================================================================

    /// Inserts the detached `node` into the mesh, locating it from `start`.
    ///
    /// Returns one of the created tetrahedra.
    pub(crate) fn insert(
        &mut self,
        node: NodeKey,
        start: TetrahedronKey,
    ) -> Result<Option<TetrahedronKey>, TriangulationError> {
        let position = self.position(node)?;
        let start = self.search_initial_insertion_tetrahedron(start, &position)?;

        let listeners = self.node_ref(node)?.listeners.clone();
        if !listeners.is_empty() {
            let payloads = self.vertex_payloads(start)?;
            let space_node = self.node_ref(node)?;
            for listener in &listeners {
                listener.node_about_to_be_added(space_node, &position, payloads);
            }
        }

        let mut organizer = OpenTriangleOrganizer::new();
        let mut queue = Vec::new();
        let mut outer = Vec::new();
        self.process_tetrahedron(start, &mut queue, &mut organizer)?;
        let mut next = 0;
        while let Some(&triangle) = queue.get(next) {
            next += 1;
            let Some(Some(opposite)) = self
                .triangles
                .get(triangle)
                .and_then(|t| t.opposite_tetrahedron(None))
            else {
                continue;
            };
            if self.is_truly_inside_sphere(opposite, &position)? {
                self.process_tetrahedron(opposite, &mut queue, &mut organizer)?;
            } else {
                outer.push(triangle);
            }
        }

        let mut witness = None;
        for triangle in outer {
            if !self.triangle_ref(triangle)?.is_completely_open() {
                witness =
                    Some(organizer.create_tetrahedron_from_triangle(self, triangle, Some(node))?);
            }
        }
        tracing::trace!(
            node = ?node,
            created = organizer.new_tetrahedra().len(),
            "closed insertion cavity"
        );

        let space_node = self.node_ref(node)?;
        for listener in &listeners {
            listener.node_added(space_node);
        }
        Ok(witness)
    }

    /// Cuts `tetrahedron` out of the cavity and registers its triangles.
    fn process_tetrahedron(
        &mut self,
        tetrahedron: TetrahedronKey,
        queue: &mut Vec<TriangleKey>,
        organizer: &mut OpenTriangleOrganizer,
    ) -> Result<(), TriangulationError> {
        let removed = self.remove_tetrahedron(tetrahedron)?;
        for triangle in removed.triangles {
            if self.triangle_ref(triangle)?.is_completely_open() {
                organizer.remove_triangle(self, triangle)?;
            } else {
                queue.push(triangle);
                organizer.put_triangle(self, triangle)?;
            }
        }
        Ok(())
    }
}
