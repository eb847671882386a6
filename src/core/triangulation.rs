//! The triangulation arena.
//!
//! [`Triangulation`] owns every node, edge, triangle and tetrahedron of the mesh
//! in [`StorageMap`]s and links them through typed keys. The leaf types
//! ([`SpaceNode`], [`Edge`], [`Triangle`], [`Tetrahedron`]) only hold keys; every
//! operation that has to follow a link or keep the incidence lists consistent is
//! a method here.
//!
//! This module contains the queries and the low-level wiring (creating and
//! detaching elements, keeping volumes and cross sections in sync). The
//! algorithms built on top of it live in [`crate::core::algorithms`].
//!
//! # Examples
//!
//! ```rust
//! use spatial_organization::core::triangulation::Triangulation;
//!
//! let mut mesh: Triangulation<&str> = Triangulation::new();
//! let a = mesh.insert_node([0.0, 0.0, 0.0], "a").unwrap();
//! mesh.insert_node([1.0, 0.0, 0.0], "b").unwrap();
//! mesh.insert_node([0.0, 1.0, 0.0], "c").unwrap();
//! mesh.insert_node([0.0, 0.0, 1.0], "d").unwrap();
//!
//! assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
//! assert_eq!(mesh.neighbors(a).unwrap().len(), 3);
//! ```

use nalgebra::Vector3;
use slotmap::new_key_type;
use thiserror::Error;
use tracing::trace;

use crate::core::collections::{StorageMap, TriangleBuffer};
use crate::core::edge::Edge;
use crate::core::listener::SharedListener;
use crate::core::node::{NodeState, SpaceNode};
use crate::core::tetrahedron::{
    CircumSphere, EDGE_NODE_PAIRS, Tetrahedron, TetrahedronKind, TetrahedronPoints,
    cross_section_areas,
};
use crate::core::traversal::{ShuffledOrder, TriangleOrder};
use crate::core::triangle::{Triangle, TrianglePoints};
use crate::geometry::config::TriangulationConfig;
use crate::geometry::predicates::CHECKING_INDEX_WRAP;
use crate::geometry::rational::RationalError;

new_key_type! {
    /// Key of a [`SpaceNode`] in a [`Triangulation`].
    pub struct NodeKey;
    /// Key of an [`Edge`] in a [`Triangulation`].
    pub struct EdgeKey;
    /// Key of a [`Triangle`] in a [`Triangulation`].
    pub struct TriangleKey;
    /// Key of a [`Tetrahedron`] in a [`Triangulation`].
    pub struct TetrahedronKey;
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors reported by triangulation operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TriangulationError {
    /// The incidence structure is inconsistent.
    #[error("Invalid topology: {message}")]
    InvalidTopology {
        /// Description of the inconsistency.
        message: String,
    },
    /// An edge refers to a node that is no longer part of the mesh.
    #[error("Edge {edge:?} has an endpoint that is not part of the triangulation")]
    NullEndpoint {
        /// The offending edge.
        edge: EdgeKey,
    },
    /// A point was placed exactly on an existing node.
    #[error(
        "Position {position:?} is already occupied by node {node:?}; a free position nearby is {suggestion:?}"
    )]
    PositionNotAllowed {
        /// The rejected position.
        position: [f64; 3],
        /// The node occupying it.
        node: NodeKey,
        /// A nearby position that is free.
        suggestion: [f64; 3],
    },
    /// A flip was asked to produce a tetrahedron through the infinite node on
    /// a slot that must be finite.
    #[error("Degenerate flip rejected: {message}")]
    DegenerateFlipRejected {
        /// Description of the rejected configuration.
        message: String,
    },
    /// Exact arithmetic failed.
    #[error("Exact arithmetic failed: {0}")]
    Arithmetic(#[from] RationalError),
    /// A node key does not refer to a live node.
    #[error("Node {node:?} is not part of the triangulation")]
    NodeNotFound {
        /// The stale key.
        node: NodeKey,
    },
    /// The first four nodes are coplanar, so no initial tetrahedron exists.
    #[error("The first four nodes are coplanar; no initial tetrahedron can be built")]
    DegenerateInitialSimplex,
    /// Point location did not terminate.
    #[error("Point location did not terminate after {steps} steps")]
    CycleDetected {
        /// Steps taken before giving up.
        steps: usize,
    },
    /// Closing an open cavity did not terminate.
    #[error("Retriangulation did not terminate after {steps} steps")]
    RetriangulationStalled {
        /// Steps taken before giving up.
        steps: usize,
    },
}

impl TriangulationError {
    pub(crate) fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }
}

/// What a removed tetrahedron leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTetrahedron {
    /// The node slots of the removed tetrahedron.
    pub nodes: [Option<NodeKey>; 4],
    /// Its four triangles, in slot order.
    pub triangles: [TriangleKey; 4],
    /// Those triangles that still have one tetrahedron attached.
    pub open_triangles: TriangleBuffer,
}

// =============================================================================
// TRIANGULATION
// =============================================================================

/// Dynamic 3-D Delaunay triangulation over nodes carrying payloads of type `U`.
pub struct Triangulation<U> {
    pub(crate) nodes: StorageMap<NodeKey, SpaceNode<U>>,
    pub(crate) edges: StorageMap<EdgeKey, Edge>,
    pub(crate) triangles: StorageMap<TriangleKey, Triangle>,
    pub(crate) tetrahedra: StorageMap<TetrahedronKey, Tetrahedron>,
    pub(crate) checking_index: i64,
    pub(crate) triangle_order: Box<dyn TriangleOrder>,
    pub(crate) config: TriangulationConfig,
    pub(crate) orphaned_triangles: Vec<TriangleKey>,
}

impl<U> Default for Triangulation<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> std::fmt::Debug for Triangulation<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Triangulation")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("triangles", &self.triangles.len())
            .field("tetrahedra", &self.tetrahedra.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<U> Triangulation<U> {
    /// Creates an empty triangulation with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TriangulationConfig::default())
    }

    /// Creates an empty triangulation. Point location shuffles its face order
    /// from `config.traversal_seed`.
    #[must_use]
    pub fn with_config(config: TriangulationConfig) -> Self {
        Self::with_triangle_order(config, Box::new(ShuffledOrder::new(config.traversal_seed)))
    }

    /// Creates an empty triangulation with an explicit face order for point
    /// location.
    #[must_use]
    pub fn with_triangle_order(
        config: TriangulationConfig,
        triangle_order: Box<dyn TriangleOrder>,
    ) -> Self {
        Self {
            nodes: StorageMap::with_key(),
            edges: StorageMap::with_key(),
            triangles: StorageMap::with_key(),
            tetrahedra: StorageMap::with_key(),
            checking_index: 0,
            triangle_order,
            config,
            orphaned_triangles: Vec::new(),
        }
    }

    /// The configuration in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &TriangulationConfig {
        &self.config
    }

    // =========================================================================
    // COUNTS AND ITERATORS
    // =========================================================================

    /// Number of nodes.
    #[must_use]
    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of triangles, including the infinite ones.
    #[must_use]
    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Number of tetrahedra, including the infinite ones.
    #[must_use]
    pub fn number_of_tetrahedra(&self) -> usize {
        self.tetrahedra.len()
    }

    /// Number of tetrahedra with four real nodes.
    #[must_use]
    pub fn number_of_finite_tetrahedra(&self) -> usize {
        self.tetrahedra.values().filter(|t| !t.is_infinite()).count()
    }

    /// All nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &SpaceNode<U>)> {
        self.nodes.iter()
    }

    /// All edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &Edge)> {
        self.edges.iter()
    }

    /// All triangles.
    pub fn triangles(&self) -> impl Iterator<Item = (TriangleKey, &Triangle)> {
        self.triangles.iter()
    }

    /// All tetrahedra.
    pub fn tetrahedra(&self) -> impl Iterator<Item = (TetrahedronKey, &Tetrahedron)> {
        self.tetrahedra.iter()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, key: NodeKey) -> Option<&SpaceNode<U>> {
        self.nodes.get(key)
    }

    /// Looks up an edge.
    #[must_use]
    pub fn edge(&self, key: EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    /// Looks up a triangle.
    #[must_use]
    pub fn triangle(&self, key: TriangleKey) -> Option<&Triangle> {
        self.triangles.get(key)
    }

    /// Looks up a tetrahedron.
    #[must_use]
    pub fn tetrahedron(&self, key: TetrahedronKey) -> Option<&Tetrahedron> {
        self.tetrahedra.get(key)
    }

    // =========================================================================
    // NODE QUERIES
    // =========================================================================

    /// Position of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn position(&self, node: NodeKey) -> Result<Vector3<f64>, TriangulationError> {
        Ok(self.node_ref(node)?.position())
    }

    /// Voronoi volume of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn volume(&self, node: NodeKey) -> Result<f64, TriangulationError> {
        Ok(self.node_ref(node)?.volume())
    }

    /// Id of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn id(&self, node: NodeKey) -> Result<u64, TriangulationError> {
        Ok(self.node_ref(node)?.id())
    }

    /// Payload of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn payload(&self, node: NodeKey) -> Result<&U, TriangulationError> {
        Ok(self.node_ref(node)?.payload())
    }

    /// Mutable payload of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn payload_mut(&mut self, node: NodeKey) -> Result<&mut U, TriangulationError> {
        Ok(self.node_mut(node)?.payload_mut())
    }

    /// Snapshot of the simulation state of `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn node_state(&self, node: NodeKey) -> Result<NodeState, TriangulationError> {
        Ok(self.node_ref(node)?.state())
    }

    /// Snapshots of all nodes, ordered by id.
    #[must_use]
    pub fn node_states(&self) -> Vec<NodeState> {
        let mut states: Vec<NodeState> = self.nodes.values().map(SpaceNode::state).collect();
        states.sort_by_key(|s| s.id);
        states
    }

    /// Payloads of the nodes sharing an edge with `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NullEndpoint`] when an incident edge points at a
    /// node that no longer exists, [`TriangulationError::NodeNotFound`] for a
    /// stale key.
    pub fn neighbors(&self, node: NodeKey) -> Result<Vec<&U>, TriangulationError> {
        self.neighbor_nodes(node)?
            .into_iter()
            .map(|n| self.payload(n))
            .collect()
    }

    /// Like [`neighbors`](Self::neighbors), but silently skips edges whose far
    /// end is gone.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn permanent_neighbors(&self, node: NodeKey) -> Result<Vec<&U>, TriangulationError> {
        let edges = self.node_ref(node)?.edges();
        Ok(edges
            .iter()
            .filter_map(|&e| self.edges.get(e)?.opposite(node))
            .filter_map(|n| self.nodes.get(n))
            .map(SpaceNode::payload)
            .collect())
    }

    /// Keys of the nodes sharing an edge with `node`.
    ///
    /// # Errors
    ///
    /// See [`neighbors`](Self::neighbors).
    pub fn neighbor_nodes(&self, node: NodeKey) -> Result<Vec<NodeKey>, TriangulationError> {
        let edges = self.node_ref(node)?.edges();
        edges
            .iter()
            .map(|&e| {
                self.edges
                    .get(e)
                    .and_then(|edge| edge.opposite(node))
                    .filter(|n| self.nodes.contains_key(*n))
                    .ok_or(TriangulationError::NullEndpoint { edge: e })
            })
            .collect()
    }

    /// Edges incident to `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn node_edges(&self, node: NodeKey) -> Result<&[EdgeKey], TriangulationError> {
        Ok(self.node_ref(node)?.edges())
    }

    /// Tetrahedra incident to `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn adjacent_tetrahedra(&self, node: NodeKey) -> Result<&[TetrahedronKey], TriangulationError> {
        Ok(self.node_ref(node)?.adjacent_tetrahedra())
    }

    /// Listeners registered on `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn listeners(&self, node: NodeKey) -> Result<&[SharedListener<U>], TriangulationError> {
        Ok(self.node_ref(node)?.listeners())
    }

    /// Registers a listener on `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale key.
    pub fn add_listener(
        &mut self,
        node: NodeKey,
        listener: SharedListener<U>,
    ) -> Result<(), TriangulationError> {
        self.node_mut(node)?.listeners.push(listener);
        Ok(())
    }

    /// Payloads of the four vertices of `tetrahedron`. Slot 0 is `None` for an
    /// infinite tetrahedron.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale tetrahedron key.
    pub fn vertex_payloads(
        &self,
        tetrahedron: TetrahedronKey,
    ) -> Result<[Option<&U>; 4], TriangulationError> {
        let nodes = self.tetrahedron_ref(tetrahedron)?.nodes();
        Ok(nodes.map(|n| n.and_then(|n| self.nodes.get(n)).map(SpaceNode::payload)))
    }

    // =========================================================================
    // EDGE QUERIES
    // =========================================================================

    /// Cross-section area of `edge`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] for a stale edge key.
    pub fn edge_cross_section(&self, edge: EdgeKey) -> Result<f64, TriangulationError> {
        Ok(self.edge_ref(edge)?.cross_section())
    }

    /// The edge connecting `a` and `b`, if any.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale node key.
    pub fn edge_between(&self, a: NodeKey, b: NodeKey) -> Result<Option<EdgeKey>, TriangulationError> {
        self.node_ref(b)?;
        Ok(self
            .node_ref(a)?
            .edges()
            .iter()
            .copied()
            .find(|&e| self.edges.get(e).is_some_and(|edge| edge.equals(a, b))))
    }

    /// The endpoint of `edge` that is not `node`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] when `node` is not an endpoint,
    /// [`TriangulationError::NullEndpoint`] when the far end is gone.
    pub fn opposite(&self, edge: EdgeKey, node: NodeKey) -> Result<NodeKey, TriangulationError> {
        let other = self.edge_ref(edge)?.opposite(node).ok_or_else(|| {
            TriangulationError::topology(format!("node {node:?} is not an endpoint of {edge:?}"))
        })?;
        if self.nodes.contains_key(other) {
            Ok(other)
        } else {
            Err(TriangulationError::NullEndpoint { edge })
        }
    }

    /// Payload of the first endpoint of `edge`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NullEndpoint`] when the endpoint is gone.
    pub fn first_element(&self, edge: EdgeKey) -> Result<&U, TriangulationError> {
        let (a, _) = self.edge_ref(edge)?.endpoints();
        self.endpoint_payload(edge, a)
    }

    /// Payload of the second endpoint of `edge`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NullEndpoint`] when the endpoint is gone.
    pub fn second_element(&self, edge: EdgeKey) -> Result<&U, TriangulationError> {
        let (_, b) = self.edge_ref(edge)?.endpoints();
        self.endpoint_payload(edge, b)
    }

    /// The payload at the other end of `edge` from the endpoint carrying
    /// `payload`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] when neither endpoint carries
    /// `payload`, [`TriangulationError::NullEndpoint`] when an endpoint is gone.
    pub fn opposite_element(&self, edge: EdgeKey, payload: &U) -> Result<&U, TriangulationError>
    where
        U: PartialEq,
    {
        let first = self.first_element(edge)?;
        let second = self.second_element(edge)?;
        if first == payload {
            Ok(second)
        } else if second == payload {
            Ok(first)
        } else {
            Err(TriangulationError::topology(format!(
                "no endpoint of {edge:?} carries the given payload"
            )))
        }
    }

    fn endpoint_payload(&self, edge: EdgeKey, node: NodeKey) -> Result<&U, TriangulationError> {
        self.nodes
            .get(node)
            .map(SpaceNode::payload)
            .ok_or(TriangulationError::NullEndpoint { edge })
    }

    // =========================================================================
    // CHECKED ACCESS
    // =========================================================================

    pub(crate) fn node_ref(&self, node: NodeKey) -> Result<&SpaceNode<U>, TriangulationError> {
        self.nodes
            .get(node)
            .ok_or(TriangulationError::NodeNotFound { node })
    }

    pub(crate) fn node_mut(&mut self, node: NodeKey) -> Result<&mut SpaceNode<U>, TriangulationError> {
        self.nodes
            .get_mut(node)
            .ok_or(TriangulationError::NodeNotFound { node })
    }

    pub(crate) fn edge_ref(&self, edge: EdgeKey) -> Result<&Edge, TriangulationError> {
        self.edges
            .get(edge)
            .ok_or_else(|| TriangulationError::topology(format!("edge {edge:?} does not exist")))
    }

    pub(crate) fn triangle_ref(&self, triangle: TriangleKey) -> Result<&Triangle, TriangulationError> {
        self.triangles.get(triangle).ok_or_else(|| {
            TriangulationError::topology(format!("triangle {triangle:?} does not exist"))
        })
    }

    pub(crate) fn triangle_mut(
        &mut self,
        triangle: TriangleKey,
    ) -> Result<&mut Triangle, TriangulationError> {
        self.triangles.get_mut(triangle).ok_or_else(|| {
            TriangulationError::topology(format!("triangle {triangle:?} does not exist"))
        })
    }

    pub(crate) fn tetrahedron_ref(
        &self,
        tetrahedron: TetrahedronKey,
    ) -> Result<&Tetrahedron, TriangulationError> {
        self.tetrahedra.get(tetrahedron).ok_or_else(|| {
            TriangulationError::topology(format!("tetrahedron {tetrahedron:?} does not exist"))
        })
    }

    pub(crate) fn tetrahedron_mut(
        &mut self,
        tetrahedron: TetrahedronKey,
    ) -> Result<&mut Tetrahedron, TriangulationError> {
        self.tetrahedra.get_mut(tetrahedron).ok_or_else(|| {
            TriangulationError::topology(format!("tetrahedron {tetrahedron:?} does not exist"))
        })
    }

    /// Vertex positions of `triangle`, or `None` if it is infinite.
    pub(crate) fn triangle_points(
        &self,
        triangle: TriangleKey,
    ) -> Result<Option<TrianglePoints>, TriangulationError> {
        let [a, b, c] = self.triangle_ref(triangle)?.nodes();
        match (a, b, c) {
            (Some(a), Some(b), Some(c)) => Ok(Some([
                self.position(a)?,
                self.position(b)?,
                self.position(c)?,
            ])),
            _ => Ok(None),
        }
    }

    /// Vertex positions of a triangle that must be finite.
    pub(crate) fn finite_triangle_points(
        &self,
        triangle: TriangleKey,
    ) -> Result<TrianglePoints, TriangulationError> {
        self.triangle_points(triangle)?.ok_or_else(|| {
            TriangulationError::topology(format!("triangle {triangle:?} is infinite"))
        })
    }

    /// Vertex positions of `tetrahedron`, or `None` if it is infinite.
    pub(crate) fn tetrahedron_points(
        &self,
        tetrahedron: TetrahedronKey,
    ) -> Result<Option<TetrahedronPoints>, TriangulationError> {
        let nodes = self.tetrahedron_ref(tetrahedron)?.nodes();
        let mut points = [Vector3::zeros(); 4];
        for (point, node) in points.iter_mut().zip(nodes) {
            match node {
                Some(node) => *point = self.position(node)?,
                None => return Ok(None),
            }
        }
        Ok(Some(points))
    }

    /// The tetrahedron across triangle slot `index` of `tetrahedron`.
    pub(crate) fn adjacent_tetrahedron(
        &self,
        tetrahedron: TetrahedronKey,
        index: usize,
    ) -> Result<Option<TetrahedronKey>, TriangulationError> {
        let triangle = self.tetrahedron_ref(tetrahedron)?.triangles[index];
        self.tetrahedron_across(triangle, Some(tetrahedron))
    }

    /// The tetrahedron on the other side of `triangle` from `incident`.
    pub(crate) fn tetrahedron_across(
        &self,
        triangle: TriangleKey,
        incident: Option<TetrahedronKey>,
    ) -> Result<Option<TetrahedronKey>, TriangulationError> {
        self.triangle_ref(triangle)?
            .opposite_tetrahedron(incident)
            .ok_or_else(|| {
                TriangulationError::topology(format!(
                    "{incident:?} is not attached to triangle {triangle:?}"
                ))
            })
    }

    pub(crate) fn is_infinite_tetrahedron(
        &self,
        tetrahedron: TetrahedronKey,
    ) -> Result<bool, TriangulationError> {
        Ok(self.tetrahedron_ref(tetrahedron)?.is_infinite())
    }

    /// Whether `a` and `b` share a triangle.
    pub(crate) fn is_neighbor(
        &self,
        a: TetrahedronKey,
        b: TetrahedronKey,
    ) -> Result<bool, TriangulationError> {
        let triangles = self.tetrahedron_ref(a)?.triangles;
        for triangle in triangles {
            if self.triangle_ref(triangle)?.is_adjacent_to_tetrahedron(b) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // =========================================================================
    // WIRING
    // =========================================================================

    /// Advances the per-pass checking generation.
    pub(crate) fn next_checking_index(&mut self) -> i64 {
        self.checking_index = (self.checking_index + 1) % CHECKING_INDEX_WRAP;
        self.checking_index
    }

    /// Creates an edge between `a` and `b` and registers it with both nodes.
    pub(crate) fn create_edge(&mut self, a: NodeKey, b: NodeKey) -> Result<EdgeKey, TriangulationError> {
        self.node_ref(a)?;
        self.node_ref(b)?;
        let edge = self.edges.insert(Edge::new(a, b));
        self.node_mut(a)?.add_edge(edge);
        self.node_mut(b)?.add_edge(edge);
        Ok(edge)
    }

    /// The edge between `a` and `b`, created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::NodeNotFound`] for a stale node key.
    pub fn search_edge(&mut self, a: NodeKey, b: NodeKey) -> Result<EdgeKey, TriangulationError> {
        match self.edge_between(a, b)? {
            Some(edge) => Ok(edge),
            None => self.create_edge(a, b),
        }
    }

    /// Removes `edge` from the arena and from both endpoints.
    pub(crate) fn dissolve_edge(&mut self, edge: EdgeKey) {
        if let Some(removed) = self.edges.remove(edge) {
            let (a, b) = removed.endpoints();
            for node in [a, b] {
                if let Some(node) = self.nodes.get_mut(node) {
                    node.remove_edge(edge);
                }
            }
        }
    }

    /// Detaches `tetrahedron` from `edge`, dissolving the edge once no
    /// tetrahedron uses it anymore.
    pub(crate) fn detach_edge(&mut self, edge: EdgeKey, tetrahedron: TetrahedronKey) {
        let now_unused = self
            .edges
            .get_mut(edge)
            .is_some_and(|e| e.remove_tetrahedron(tetrahedron));
        if now_unused {
            self.dissolve_edge(edge);
        }
    }

    /// Creates an unattached triangle. It is collected at the end of the
    /// current operation unless a tetrahedron adopts it.
    pub(crate) fn create_triangle(&mut self, nodes: [Option<NodeKey>; 3]) -> TriangleKey {
        let key = self.triangles.insert(Triangle::new(nodes[0], nodes[1], nodes[2]));
        self.orphaned_triangles.push(key);
        key
    }

    /// Creates a tetrahedron from four triangles and four nodes, wiring it to
    /// nodes, triangles and edges and computing its circumsphere.
    ///
    /// Triangle `i` must lie opposite node `i`.
    pub(crate) fn create_tetrahedron_from_parts(
        &mut self,
        triangles: [TriangleKey; 4],
        nodes: [Option<NodeKey>; 4],
        flat: bool,
    ) -> Result<TetrahedronKey, TriangulationError> {
        if nodes[1..].iter().any(Option::is_none) {
            return Err(TriangulationError::topology(
                "only node slot 0 of a tetrahedron may be infinite",
            ));
        }
        for triangle in triangles {
            if self.triangle_ref(triangle)?.is_closed() {
                return Err(TriangulationError::topology(format!(
                    "triangle {triangle:?} already has two tetrahedra"
                )));
            }
        }
        let key = self
            .tetrahedra
            .insert(Tetrahedron::new(nodes, triangles, flat));
        for node in nodes.into_iter().flatten() {
            self.node_mut(node)?.add_tetrahedron(key);
        }
        for triangle in triangles {
            self.triangle_mut(triangle)?.add_tetrahedron(key);
        }
        self.register_edges(key)?;
        self.calculate_circum_sphere(key)?;
        trace!(tetrahedron = ?key, flat, "created tetrahedron");
        Ok(key)
    }

    /// Attaches the six edges of a finite tetrahedron.
    pub(crate) fn register_edges(&mut self, tetrahedron: TetrahedronKey) -> Result<(), TriangulationError> {
        let nodes = self.tetrahedron_ref(tetrahedron)?.nodes();
        let [Some(_), Some(_), Some(_), Some(_)] = nodes else {
            return Ok(());
        };
        for (index, &(i, j)) in EDGE_NODE_PAIRS.iter().enumerate() {
            let (Some(a), Some(b)) = (nodes[i], nodes[j]) else {
                continue;
            };
            let edge = self.search_edge(a, b)?;
            self.edges
                .get_mut(edge)
                .ok_or(TriangulationError::NullEndpoint { edge })?
                .add_tetrahedron(tetrahedron);
            self.tetrahedron_mut(tetrahedron)?.edges[index] = Some(edge);
        }
        Ok(())
    }

    /// Recomputes circumsphere, volume and cross sections of a finite regular
    /// tetrahedron and pushes the changes to its nodes and edges.
    pub(crate) fn calculate_circum_sphere(
        &mut self,
        tetrahedron: TetrahedronKey,
    ) -> Result<(), TriangulationError> {
        if self.tetrahedron_ref(tetrahedron)?.is_flat() {
            return Ok(());
        }
        let Some(points) = self.tetrahedron_points(tetrahedron)? else {
            return Ok(());
        };
        let (sphere, volume) = CircumSphere::compute(&points);
        self.change_volume(tetrahedron, volume)?;
        let areas = cross_section_areas(&points);
        for (index, area) in areas.into_iter().enumerate() {
            self.change_cross_section(tetrahedron, index, area)?;
        }
        self.tetrahedron_mut(tetrahedron)?.kind = TetrahedronKind::Regular(sphere);
        Ok(())
    }

    fn change_volume(
        &mut self,
        tetrahedron: TetrahedronKey,
        new_volume: f64,
    ) -> Result<(), TriangulationError> {
        let tet = self.tetrahedron_mut(tetrahedron)?;
        let change_per_node = (new_volume - tet.volume) / 4.0;
        tet.volume = new_volume;
        let nodes = tet.nodes;
        if change_per_node != 0.0 {
            for node in nodes.into_iter().flatten() {
                self.node_mut(node)?.change_volume(change_per_node);
            }
        }
        Ok(())
    }

    fn change_cross_section(
        &mut self,
        tetrahedron: TetrahedronKey,
        index: usize,
        new_area: f64,
    ) -> Result<(), TriangulationError> {
        let tet = self.tetrahedron_mut(tetrahedron)?;
        let change = new_area - tet.cross_section_areas[index];
        tet.cross_section_areas[index] = new_area;
        if change != 0.0 {
            if let Some(edge) = tet.edges[index] {
                if let Some(edge) = self.edges.get_mut(edge) {
                    edge.change_cross_section_area(change);
                }
            }
        }
        Ok(())
    }

    /// Refreshes a tetrahedron after `moved` changed position: the sphere is
    /// recomputed and the cached geometry of the triangles touching `moved` is
    /// invalidated.
    pub(crate) fn update_circum_sphere_after_node_movement(
        &mut self,
        tetrahedron: TetrahedronKey,
        moved: NodeKey,
    ) -> Result<(), TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        let moved_slot = tet.node_number(Some(moved));
        let triangles = tet.triangles;
        for (slot, triangle) in triangles.into_iter().enumerate() {
            if Some(slot) != moved_slot {
                self.triangle_mut(triangle)?.inform_about_node_movement();
            }
        }
        self.calculate_circum_sphere(tetrahedron)
    }

    /// Detaches `tetrahedron` from its nodes, triangles and edges and drops it.
    ///
    /// A finite tetrahedron first orients every triangle facing an infinite
    /// neighbour toward its own opposite node, so the hull side stays known
    /// while the cavity is open.
    pub(crate) fn remove_tetrahedron(
        &mut self,
        tetrahedron: TetrahedronKey,
    ) -> Result<RemovedTetrahedron, TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?.clone();
        let infinite = tet.is_infinite();
        for slot in 0..4 {
            let node = tet.nodes[slot];
            if let Some(node) = node {
                let node = self.node_mut(node)?;
                node.change_volume(-tet.volume / 4.0);
                node.remove_tetrahedron(tetrahedron);
            }
            let triangle = tet.triangles[slot];
            if !infinite {
                let opposite = self.tetrahedron_across(triangle, Some(tetrahedron))?;
                if let (Some(opposite), Some(node)) = (opposite, node) {
                    if self.is_infinite_tetrahedron(opposite)? {
                        let points = self.finite_triangle_points(triangle)?;
                        let position = self.position(node)?;
                        self.triangle_mut(triangle)?.orient_to_side(&points, &position);
                    }
                }
            }
            let triangle = self.triangle_mut(triangle)?;
            triangle.remove_tetrahedron(tetrahedron);
            if triangle.is_completely_open() {
                self.orphaned_triangles.push(tet.triangles[slot]);
            }
        }
        for (index, edge) in tet.edges.iter().enumerate() {
            if let Some(edge) = *edge {
                if let Some(e) = self.edges.get_mut(edge) {
                    e.change_cross_section_area(-tet.cross_section_areas[index]);
                }
                self.detach_edge(edge, tetrahedron);
            }
        }
        self.tetrahedra.remove(tetrahedron);
        let open_triangles = tet
            .triangles
            .iter()
            .copied()
            .filter(|&t| self.triangles.get(t).is_some_and(Triangle::is_open))
            .collect();
        Ok(RemovedTetrahedron {
            nodes: tet.nodes,
            triangles: tet.triangles,
            open_triangles,
        })
    }

    /// Drops triangles that ended the current operation without any tetrahedron.
    pub(crate) fn collect_orphaned_triangles(&mut self) {
        for triangle in std::mem::take(&mut self.orphaned_triangles) {
            if self
                .triangles
                .get(triangle)
                .is_some_and(Triangle::is_completely_open)
            {
                self.triangles.remove(triangle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tetrahedron() -> (Triangulation<u32>, [NodeKey; 4]) {
        let mut mesh = Triangulation::new();
        let a = mesh.insert_node([0.0, 0.0, 0.0], 0).unwrap();
        let b = mesh.insert_node([1.0, 0.0, 0.0], 1).unwrap();
        let c = mesh.insert_node([0.0, 1.0, 0.0], 2).unwrap();
        let d = mesh.insert_node([0.0, 0.0, 1.0], 3).unwrap();
        (mesh, [a, b, c, d])
    }

    #[test]
    fn test_initial_tetrahedron_counts() {
        let (mesh, _) = unit_tetrahedron();
        assert_eq!(mesh.number_of_nodes(), 4);
        assert_eq!(mesh.number_of_edges(), 6);
        // one finite tetrahedron closed by four infinite ones
        assert_eq!(mesh.number_of_tetrahedra(), 5);
        assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
        // four finite faces plus six infinite ones, one per hull edge
        assert_eq!(mesh.number_of_triangles(), 10);
        assert!(mesh.triangles().all(|(_, t)| t.is_closed()));
    }

    #[test]
    fn test_volumes_sum_to_tetrahedron_volume() {
        let (mesh, nodes) = unit_tetrahedron();
        let total: f64 = nodes.iter().map(|&n| mesh.volume(n).unwrap()).sum();
        assert_relative_eq!(total, 1.0 / 6.0, epsilon = 1e-12);
        for &n in &nodes {
            assert_relative_eq!(mesh.volume(n).unwrap(), 1.0 / 24.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_edge_queries() {
        let (mesh, [a, b, c, _]) = unit_tetrahedron();
        let edge = mesh.edge_between(a, b).unwrap().unwrap();
        assert_eq!(mesh.opposite(edge, a).unwrap(), b);
        assert!(mesh.opposite(edge, c).is_err());
        assert_eq!(*mesh.opposite_element(edge, &0).unwrap(), 1);
        assert!(mesh.edge_cross_section(edge).unwrap() > 0.0);
        let first = *mesh.first_element(edge).unwrap();
        let second = *mesh.second_element(edge).unwrap();
        assert_eq!(first + second, 1);
    }

    #[test]
    fn test_neighbors_of_initial_tetrahedron() {
        let (mesh, [a, ..]) = unit_tetrahedron();
        let mut payloads: Vec<u32> = mesh.neighbors(a).unwrap().into_iter().copied().collect();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![1, 2, 3]);
        assert_eq!(mesh.permanent_neighbors(a).unwrap().len(), 3);
        assert_eq!(mesh.adjacent_tetrahedra(a).unwrap().len(), 4);
    }

    #[test]
    fn test_search_edge_is_get_or_create() {
        let (mut mesh, [a, b, ..]) = unit_tetrahedron();
        let before = mesh.number_of_edges();
        let existing = mesh.search_edge(a, b).unwrap();
        assert_eq!(mesh.number_of_edges(), before);
        assert_eq!(Some(existing), mesh.edge_between(b, a).unwrap());
    }

    #[test]
    fn test_vertex_payloads_of_infinite_tetrahedron() {
        let (mesh, _) = unit_tetrahedron();
        let (infinite, _) = mesh.tetrahedra().find(|(_, t)| t.is_infinite()).unwrap();
        let payloads = mesh.vertex_payloads(infinite).unwrap();
        assert!(payloads[0].is_none());
        assert!(payloads[1..].iter().all(Option::is_some));
    }

    #[test]
    fn test_node_states_sorted_by_id() {
        let (mesh, _) = unit_tetrahedron();
        let states = mesh.node_states();
        assert_eq!(states.len(), 4);
        assert!(states.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_stale_node_key() {
        let (mut mesh, [a, ..]) = unit_tetrahedron();
        mesh.nodes.remove(a);
        assert_eq!(
            mesh.position(a),
            Err(TriangulationError::NodeNotFound { node: a })
        );
    }

    #[test]
    fn test_checking_index_wraps() {
        let mut mesh: Triangulation<()> = Triangulation::new();
        mesh.checking_index = CHECKING_INDEX_WRAP - 1;
        assert_eq!(mesh.next_checking_index(), 0);
        assert_eq!(mesh.next_checking_index(), 1);
    }
}
