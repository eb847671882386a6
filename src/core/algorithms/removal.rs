//! Node removal.
//!
//! Removing a node deletes its star and fills the cavity through the
//! [`OpenTriangleOrganizer`]. Tetrahedra beyond the star whose circumsphere
//! still contains the old position would violate the Delaunay criterion once
//! the node is gone, so they are cut out as well before the hole is closed.
//!
//! A mesh of four nodes cannot lose one and stay a mesh. It is dissolved back
//! into the edge-connected bootstrap state instead.

use crate::core::open_triangle_organizer::OpenTriangleOrganizer;
use crate::core::triangulation::{NodeKey, TetrahedronKey, Triangulation, TriangulationError};

impl<U> Triangulation<U> {
    /// Removes `node` and returns its payload.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key,
    /// [`TriangulationError::RetriangulationStalled`] if the cavity cannot be
    /// closed within the configured step limit.
    pub fn remove_node(&mut self, node: NodeKey) -> Result<U, TriangulationError> {
        self.node_ref(node)?;
        if self.tetrahedra.is_empty() {
            self.detach_all_edges(node)?;
        } else if self.nodes.len() <= 4 {
            self.dissolve_mesh(node)?;
        } else {
            let result = self.remove_and_return_created_tetrahedron(node);
            self.collect_orphaned_triangles();
            result?;
            self.detach_all_edges(node)?;
        }
        tracing::debug!(node = ?node, "removed node");
        self.nodes
            .remove(node)
            .map(crate::core::node::SpaceNode::into_payload)
            .ok_or(TriangulationError::NodeNotFound { node })
    }

    /// Cuts the star of `node` out of the mesh and retriangulates the hole.
    /// The node itself stays in the arena, detached.
    ///
    /// Returns one of the tetrahedra created while closing the hole.
    pub(crate) fn remove_and_return_created_tetrahedron(
        &mut self,
        node: NodeKey,
    ) -> Result<Option<TetrahedronKey>, TriangulationError> {
        let listeners = self.node_ref(node)?.listeners.clone();
        {
            let space_node = self.node_ref(node)?;
            for listener in &listeners {
                listener.node_about_to_be_removed(space_node);
            }
        }
        let position = self.position(node)?;
        let mut organizer = OpenTriangleOrganizer::new();
        let mut messed_up = Vec::new();
        let star = self.node_ref(node)?.adjacent_tetrahedra().to_vec();
        for tetrahedron in star {
            let Some(tet) = self.tetrahedra.get(tetrahedron) else {
                continue;
            };
            let opposite_triangle = tet.opposite_triangle(Some(node)).ok_or_else(|| {
                TriangulationError::topology(format!("{node:?} is not a vertex of {tetrahedron:?}"))
            })?;
            organizer.put_triangle(self, opposite_triangle)?;
            let beyond = self.tetrahedron_across(opposite_triangle, Some(tetrahedron))?;
            self.remove_tetrahedron(tetrahedron)?;
            if let Some(beyond) = beyond {
                if !self.is_infinite_tetrahedron(beyond)? && self.is_inside_sphere(beyond, &position)? {
                    messed_up.push(beyond);
                }
            }
        }
        for tetrahedron in messed_up {
            if self.tetrahedra.contains_key(tetrahedron) {
                organizer.remove_all_tetrahedra_in_sphere(self, tetrahedron)?;
            }
        }
        organizer.triangulate(self)?;

        let space_node = self.node_ref(node)?;
        for listener in &listeners {
            listener.node_removed(space_node);
        }
        Ok(organizer.a_new_tetrahedron())
    }

    /// Drops every tetrahedron and reconnects the nodes other than `removed`
    /// by plain edges.
    fn dissolve_mesh(&mut self, removed: NodeKey) -> Result<(), TriangulationError> {
        let listeners = self.node_ref(removed)?.listeners.clone();
        {
            let space_node = self.node_ref(removed)?;
            for listener in &listeners {
                listener.node_about_to_be_removed(space_node);
            }
        }
        self.clear_mesh()?;
        let remaining: Vec<NodeKey> = self.nodes.keys().filter(|&n| n != removed).collect();
        for (i, &a) in remaining.iter().enumerate() {
            for &b in &remaining[i + 1..] {
                self.create_edge(a, b)?;
            }
        }
        let space_node = self.node_ref(removed)?;
        for listener in &listeners {
            listener.node_removed(space_node);
        }
        tracing::debug!(nodes = remaining.len(), "dissolved mesh into bootstrap state");
        Ok(())
    }

    /// Removes every tetrahedron, triangle and edge. Nodes stay, with their
    /// volumes reset.
    pub(crate) fn clear_mesh(&mut self) -> Result<(), TriangulationError> {
        let tetrahedra: Vec<TetrahedronKey> = self.tetrahedra.keys().collect();
        for tetrahedron in tetrahedra {
            self.remove_tetrahedron(tetrahedron)?;
        }
        self.collect_orphaned_triangles();
        self.triangles.clear();
        let edges: Vec<_> = self.edges.keys().collect();
        for edge in edges {
            self.dissolve_edge(edge);
        }
        for node in self.nodes.values_mut() {
            let residue = node.volume();
            node.change_volume(-residue);
        }
        Ok(())
    }

    fn detach_all_edges(&mut self, node: NodeKey) -> Result<(), TriangulationError> {
        let edges = self.node_ref(node)?.edges().to_vec();
        for edge in edges {
            self.dissolve_edge(edge);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::util::validation::{is_delaunay, validate_topology};

    fn corner() -> (Triangulation<u32>, [NodeKey; 4]) {
        let mut mesh = Triangulation::new();
        let a = mesh.insert_node([0.0, 0.0, 0.0], 0).unwrap();
        let b = mesh.insert_node([1.0, 0.0, 0.0], 1).unwrap();
        let c = mesh.insert_node([0.0, 1.0, 0.0], 2).unwrap();
        let d = mesh.insert_node([0.0, 0.0, 1.0], 3).unwrap();
        (mesh, [a, b, c, d])
    }

    fn counts(mesh: &Triangulation<u32>) -> (usize, usize, usize, usize) {
        (
            mesh.number_of_nodes(),
            mesh.number_of_edges(),
            mesh.number_of_triangles(),
            mesh.number_of_tetrahedra(),
        )
    }

    #[test]
    fn test_removing_interior_node_leaves_no_trace() {
        let (mut mesh, _) = corner();
        let before = counts(&mesh);
        let e = mesh.insert_node([0.1, 0.2, 0.3], 4).unwrap();
        assert_eq!(mesh.remove_node(e).unwrap(), 4);
        assert_eq!(counts(&mesh), before);
        assert!(mesh.node(e).is_none());
        assert!(mesh.tetrahedra().all(|(_, t)| !t.is_adjacent_to(Some(e))));
        assert!(mesh.edges().all(|(_, edge)| !edge.is_incident_to(e)));
        assert!(mesh.triangles().all(|(_, t)| !t.is_adjacent_to_node(Some(e))));
        validate_topology(&mesh).unwrap();
    }

    #[test]
    fn test_removing_hull_node() {
        let (mut mesh, [a, ..]) = corner();
        mesh.insert_node([0.3, 0.3, 0.3], 4).unwrap();
        mesh.insert_node([1.0, 1.0, 1.0], 5).unwrap();
        mesh.remove_node(a).unwrap();
        assert_eq!(mesh.number_of_nodes(), 5);
        validate_topology(&mesh).unwrap();
        assert!(is_delaunay(&mesh).unwrap());
    }

    #[test]
    fn test_four_node_mesh_dissolves_into_bootstrap() {
        let (mut mesh, [_, _, _, d]) = corner();
        mesh.remove_node(d).unwrap();
        assert_eq!(mesh.number_of_nodes(), 3);
        assert_eq!(mesh.number_of_edges(), 3);
        assert_eq!(mesh.number_of_tetrahedra(), 0);
        assert_eq!(mesh.number_of_triangles(), 0);
        mesh.insert_node([0.0, 0.0, -1.0], 7).unwrap();
        assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
        validate_topology(&mesh).unwrap();
    }

    #[test]
    fn test_bootstrap_removal() {
        let mut mesh: Triangulation<u32> = Triangulation::new();
        let a = mesh.insert_node([0.0, 0.0, 0.0], 0).unwrap();
        let b = mesh.insert_node([1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(mesh.remove_node(a).unwrap(), 0);
        assert_eq!(mesh.number_of_edges(), 0);
        assert!(mesh.neighbors(b).unwrap().is_empty());
        assert_eq!(
            mesh.remove_node(a),
            Err(TriangulationError::NodeNotFound { node: a })
        );
    }
}
