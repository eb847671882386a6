//! Points of the spatial organization.
//!
//! A [`SpaceNode`] is a position in 3-D space carrying a user payload `U` (in a
//! simulation this is the physical object that owns the point). The node keeps
//! the bookkeeping the mesh needs around it: incident edges and tetrahedra, the
//! accumulated Voronoi volume, and the listeners notified when it moves, appears
//! or disappears.
//!
//! Nodes are owned by a [`Triangulation`](crate::core::triangulation::Triangulation)
//! and addressed through [`NodeKey`](crate::core::triangulation::NodeKey)s;
//! every operation that changes the mesh is a method there.

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::collections::remove_first;
use crate::core::listener::SharedListener;
use crate::core::triangulation::{EdgeKey, TetrahedronKey};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Hands out process-wide unique, increasing node ids.
fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A point of the triangulation together with its payload.
pub struct SpaceNode<U> {
    id: u64,
    position: Vector3<f64>,
    payload: U,
    volume: f64,
    pub(crate) edges: Vec<EdgeKey>,
    pub(crate) tetrahedra: Vec<TetrahedronKey>,
    pub(crate) listeners: Vec<SharedListener<U>>,
}

impl<U> SpaceNode<U> {
    /// Creates a detached node with a fresh id.
    pub(crate) fn new(position: Vector3<f64>, payload: U) -> Self {
        Self {
            id: next_node_id(),
            position,
            payload,
            volume: 0.0,
            edges: Vec::new(),
            tetrahedra: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Process-wide unique id; later nodes have larger ids.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Vector3<f64>) {
        self.position = position;
    }

    /// The user payload.
    #[inline]
    #[must_use]
    pub const fn payload(&self) -> &U {
        &self.payload
    }

    /// Mutable access to the user payload.
    #[inline]
    pub const fn payload_mut(&mut self) -> &mut U {
        &mut self.payload
    }

    pub(crate) fn into_payload(self) -> U {
        self.payload
    }

    /// Volume of the node's Voronoi cell, accumulated as a quarter of the volume
    /// of every incident tetrahedron.
    #[inline]
    #[must_use]
    pub const fn volume(&self) -> f64 {
        self.volume
    }

    pub(crate) fn change_volume(&mut self, change: f64) {
        self.volume += change;
    }

    /// Incident edges.
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[EdgeKey] {
        &self.edges
    }

    /// Incident tetrahedra.
    #[inline]
    #[must_use]
    pub fn adjacent_tetrahedra(&self) -> &[TetrahedronKey] {
        &self.tetrahedra
    }

    /// Registered listeners.
    #[inline]
    #[must_use]
    pub fn listeners(&self) -> &[SharedListener<U>] {
        &self.listeners
    }

    pub(crate) fn add_edge(&mut self, edge: EdgeKey) {
        self.edges.push(edge);
    }

    pub(crate) fn remove_edge(&mut self, edge: EdgeKey) {
        remove_first(&mut self.edges, &edge);
    }

    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        self.tetrahedra.push(tetrahedron);
    }

    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetrahedronKey) {
        remove_first(&mut self.tetrahedra, &tetrahedron);
    }

    /// Snapshot of the node's simulation state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState {
            id: self.id,
            position: self.position.into(),
            volume: self.volume,
        }
    }
}

impl<U: std::fmt::Debug> std::fmt::Debug for SpaceNode<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceNode")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("payload", &self.payload)
            .field("volume", &self.volume)
            .field("edges", &self.edges.len())
            .field("tetrahedra", &self.tetrahedra.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Serializable simulation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node id.
    pub id: u64,
    /// Position at the time of the snapshot.
    pub position: [f64; 3],
    /// Voronoi volume at the time of the snapshot.
    pub volume: f64,
}
