//! Edges of the triangulation.
//!
//! An [`Edge`] connects two nodes and accumulates the cross-section area of the
//! Voronoi facet dual to it: every incident tetrahedron contributes the part of
//! that facet lying inside it. The physics layer reads the area to scale diffusion
//! and contact forces between the two endpoint payloads.
//!
//! Edges are created on demand (by tetrahedron wiring or by the pre-mesh bootstrap)
//! and leave the arena of the [`Triangulation`](crate::core::triangulation::Triangulation)
//! as soon as their last tetrahedron detaches.

use crate::core::collections::remove_first;
use crate::core::triangulation::{NodeKey, TetrahedronKey};

/// An undirected connection between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    a: NodeKey,
    b: NodeKey,
    cross_section_area: f64,
    tetrahedra: Vec<TetrahedronKey>,
}

impl Edge {
    /// Creates an edge between `a` and `b` with no incident tetrahedra.
    #[must_use]
    pub(crate) const fn new(a: NodeKey, b: NodeKey) -> Self {
        Self {
            a,
            b,
            cross_section_area: 0.0,
            tetrahedra: Vec::new(),
        }
    }

    /// Both endpoints, in construction order.
    #[inline]
    #[must_use]
    pub const fn endpoints(&self) -> (NodeKey, NodeKey) {
        (self.a, self.b)
    }

    /// The endpoint that is not `node`, or `None` if `node` is not an endpoint.
    #[inline]
    #[must_use]
    pub fn opposite(&self, node: NodeKey) -> Option<NodeKey> {
        if node == self.a {
            Some(self.b)
        } else if node == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Whether this edge connects `a` and `b`, in either order.
    #[inline]
    #[must_use]
    pub fn equals(&self, a: NodeKey, b: NodeKey) -> bool {
        (self.a == a && self.b == b) || (self.a == b && self.b == a)
    }

    /// Whether `node` is one of the endpoints.
    #[inline]
    #[must_use]
    pub fn is_incident_to(&self, node: NodeKey) -> bool {
        self.a == node || self.b == node
    }

    /// Cross-section area of the Voronoi facet dual to this edge.
    #[inline]
    #[must_use]
    pub const fn cross_section(&self) -> f64 {
        self.cross_section_area
    }

    /// Tetrahedra containing this edge.
    #[inline]
    #[must_use]
    pub fn adjacent_tetrahedra(&self) -> &[TetrahedronKey] {
        &self.tetrahedra
    }

    /// Appends an incident tetrahedron. Duplicates are not checked.
    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        self.tetrahedra.push(tetrahedron);
    }

    /// Removes one occurrence of `tetrahedron`.
    ///
    /// Returns `true` when no tetrahedron remains, in which case the caller must
    /// dissolve the edge.
    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetrahedronKey) -> bool {
        remove_first(&mut self.tetrahedra, &tetrahedron);
        self.tetrahedra.is_empty()
    }

    /// Adds `change` to the cross-section area.
    pub(crate) fn change_cross_section_area(&mut self, change: f64) {
        self.cross_section_area += change;
    }
}
