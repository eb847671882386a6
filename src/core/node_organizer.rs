//! Candidate nodes for closing an open cavity.
//!
//! The organizer collects every node seen on the rim of a cavity. Nodes are
//! visited in a scrambled but reproducible order, `(id · 7481) mod 74317` with
//! the id as tie-breaker, so that the apex search does not depend on insertion
//! history.

use std::collections::BTreeMap;

use crate::core::triangulation::NodeKey;

const SCRAMBLE_FACTOR: u64 = 7481;
const SCRAMBLE_MODULUS: u64 = 74_317;

#[inline]
const fn scrambled(id: u64) -> (u64, u64) {
    (id.wrapping_mul(SCRAMBLE_FACTOR) % SCRAMBLE_MODULUS, id)
}

/// Ordered set of the nodes around a cavity.
#[derive(Debug, Clone, Default)]
pub struct NodeOrganizer {
    nodes: BTreeMap<(u64, u64), NodeKey>,
    first: Option<NodeKey>,
}

impl NodeOrganizer {
    /// An empty organizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node` with id `id`. Adding a node twice has no effect.
    pub fn add_node(&mut self, node: NodeKey, id: u64) {
        if self.nodes.insert(scrambled(id), node).is_none() && self.first.is_none() {
            self.first = Some(node);
        }
    }

    /// Removes the node with id `id`.
    pub fn remove_node(&mut self, id: u64) {
        if let Some(removed) = self.nodes.remove(&scrambled(id)) {
            if self.first == Some(removed) {
                self.first = self.nodes.values().next().copied();
            }
        }
    }

    /// The first node ever added (while it is still present).
    #[must_use]
    pub const fn first_node(&self) -> Option<NodeKey> {
        self.first
    }

    /// All nodes in scrambled order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.values().copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
