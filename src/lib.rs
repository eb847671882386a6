//! # spatial-organization
//!
//! An incremental 3D Delaunay triangulation over a point set that changes while
//! it is being used. It is the neighbourhood layer of an agent-based simulation:
//! every node carries the simulation object that owns it, and the simulation
//! queries neighbours, Voronoi volumes and edge cross sections while it inserts,
//! moves and removes nodes.
//!
//! # Features
//!
//! - Bowyer–Watson insertion with point location by visibility walk
//! - Local movement repaired by 2→3 and 3→2 flips, with a global
//!   remove-and-reinsert fallback
//! - Node removal with cavity retriangulation, including cospherical cavities
//! - Two-tier predicates: `f64` first, exact rationals inside the tolerance band
//! - Per-node Voronoi volumes and per-edge Voronoi cross sections, kept current
//! - Listeners notified before and after every insertion, movement and removal
//!
//! # Basic Usage
//!
//! ```rust
//! use spatial_organization::prelude::*;
//!
//! let mut mesh: Triangulation<&str> = Triangulation::new();
//! let a = mesh.insert_node([0.0, 0.0, 0.0], "a").unwrap();
//! mesh.insert_node([1.0, 0.0, 0.0], "b").unwrap();
//! mesh.insert_node([0.0, 1.0, 0.0], "c").unwrap();
//! mesh.insert_node([0.0, 0.0, 1.0], "d").unwrap();
//! let e = mesh.insert_node_near(a, [0.2, 0.2, 0.2], "e").unwrap();
//!
//! // A point inside a tetrahedron splits it into four.
//! assert_eq!(mesh.number_of_finite_tetrahedra(), 4);
//! assert_eq!(mesh.neighbors(e).unwrap().len(), 4);
//!
//! mesh.move_from(e, [0.05, 0.0, 0.0]).unwrap();
//! assert_eq!(mesh.remove_node(e).unwrap(), "e");
//! assert_eq!(mesh.number_of_finite_tetrahedra(), 1);
//! ```
//!
//! The first three nodes are only connected by edges. The fourth builds the
//! initial tetrahedron, and from then on the convex hull is closed by infinite
//! tetrahedra whose node slot 0 is empty.

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

/// The `core` module contains the triangulation arena, its elements and the
/// algorithms that maintain it.
pub mod core {
    /// Algorithms operating on a [`Triangulation`](triangulation::Triangulation)
    pub mod algorithms {
        /// Bistellar flips
        pub mod flips;
        /// Bootstrap and Bowyer–Watson insertion
        pub mod insertion;
        /// Sphere predicates, convex position and point location
        pub mod location;
        /// Node removal
        pub mod removal;
        /// Node movement and Delaunay restoration
        pub mod repair;
    }
    /// Collection aliases tuned for small integer keys
    pub mod collections;
    pub mod edge;
    pub mod hash_keys;
    pub mod listener;
    pub mod node;
    pub mod node_organizer;
    pub mod open_triangle_organizer;
    pub mod tetrahedron;
    pub mod traversal;
    pub mod triangle;
    pub mod triangulation;
    /// Debugging and validation helpers
    pub mod util {
        pub mod validation;
        pub use validation::*;
    }
    pub use edge::*;
    pub use listener::*;
    pub use node::*;
    pub use tetrahedron::*;
    pub use triangle::*;
    pub use triangulation::*;
}

/// Plane and sphere predicates, exact arithmetic and tunable limits.
pub mod geometry {
    pub mod config;
    pub mod exact_vector;
    pub mod plane;
    pub mod predicates;
    pub mod rational;
    pub use config::*;
    pub use predicates::*;
}

/// A prelude module that re-exports commonly used types.
pub mod prelude {
    pub use crate::core::{
        algorithms::repair::{REPAIR_TRACE_ENV, RepairState},
        edge::Edge,
        listener::{NodeMovementListener, SharedListener},
        node::{NodeState, SpaceNode},
        tetrahedron::{CircumSphere, Tetrahedron, TetrahedronKind},
        traversal::{SequentialOrder, ShuffledOrder, TriangleOrder},
        triangle::Triangle,
        triangulation::{
            EdgeKey, NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError,
        },
        util::validation::{
            TopologyViolation, find_delaunay_violations, is_delaunay, validate_topology,
        },
    };

    pub use crate::core::collections::{
        FastHashMap, FastHashSet, SmallBuffer, fast_hash_map_with_capacity,
    };

    pub use crate::geometry::{
        config::{TriangulationConfig, config_presets},
        predicates::{InSphere, Orientation},
        rational::{Rational, RationalError},
    };

    pub use nalgebra::Vector3;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{
        core::{edge::Edge, node::NodeState, tetrahedron::Tetrahedron, triangle::Triangle},
        geometry::{config::TriangulationConfig, rational::Rational},
        is_normal,
        prelude::Triangulation,
    };

    #[test]
    fn normal_types() {
        assert!(is_normal::<Triangulation<u32>>());
        assert!(is_normal::<Triangulation<String>>());
        assert!(is_normal::<Edge>());
        assert!(is_normal::<Triangle>());
        assert!(is_normal::<Tetrahedron>());
        assert!(is_normal::<NodeState>());
        assert!(is_normal::<Rational>());
        assert!(is_normal::<TriangulationConfig>());
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let mut mesh: Triangulation<u8> = Triangulation::with_config(config_presets::strict_limits());
        let a = mesh.insert_node(Vector3::new(0.0, 0.0, 0.0), 0).unwrap();
        assert_eq!(mesh.node_state(a).unwrap().position, [0.0, 0.0, 0.0]);
        assert!(validate_topology(&mesh).is_ok());
        let map: FastHashMap<u64, u8> = fast_hash_map_with_capacity(4);
        assert!(map.is_empty());
    }
}
