//! Observers of node movement.
//!
//! The physics layer registers a [`NodeMovementListener`] on a node to keep its
//! own state (forces, diffusion volumes, neighbour caches) in sync with the mesh.
//! Every callback has a no-op default so implementations only override the
//! events they care about. Nodes created next to an existing node inherit its
//! listeners.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::core::node::SpaceNode;

/// Callbacks fired around node movement, insertion and removal.
pub trait NodeMovementListener<U> {
    /// `node` is about to move by `delta`.
    fn node_about_to_move(&self, node: &SpaceNode<U>, delta: &Vector3<f64>) {
        let _ = (node, delta);
    }

    /// `node` has moved and the mesh around it is Delaunay again.
    fn node_moved(&self, node: &SpaceNode<U>) {
        let _ = node;
    }

    /// `node` is about to be inserted at `position`, inside the tetrahedron whose
    /// vertex payloads are `vertex_payloads`. Slot 0 is `None` for a hull
    /// tetrahedron.
    fn node_about_to_be_added(
        &self,
        node: &SpaceNode<U>,
        position: &Vector3<f64>,
        vertex_payloads: [Option<&U>; 4],
    ) {
        let _ = (node, position, vertex_payloads);
    }

    /// `node` has been inserted.
    fn node_added(&self, node: &SpaceNode<U>) {
        let _ = node;
    }

    /// `node` is about to be removed.
    fn node_about_to_be_removed(&self, node: &SpaceNode<U>) {
        let _ = node;
    }

    /// `node` has been removed and its cavity retriangulated.
    fn node_removed(&self, node: &SpaceNode<U>) {
        let _ = node;
    }
}

/// Shared handle to a listener.
pub type SharedListener<U> = Arc<dyn NodeMovementListener<U> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        moved: AtomicUsize,
    }

    impl NodeMovementListener<u32> for Counting {
        fn node_moved(&self, _node: &SpaceNode<u32>) {
            self.moved.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_default_callbacks_are_no_ops() {
        let listener = Arc::new(Counting::default());
        let shared: SharedListener<u32> = listener.clone();
        let node = SpaceNode::new(Vector3::zeros(), 7_u32);
        shared.node_about_to_move(&node, &Vector3::x());
        shared.node_added(&node);
        shared.node_moved(&node);
        assert_eq!(listener.moved.load(Ordering::Relaxed), 1);
    }
}
