//! Tunable limits for the triangulation algorithms.
//!
//! The numeric tolerances of the predicates are fixed constants (see
//! [`predicates`](super::predicates)); this configuration bounds the algorithmic loops
//! and seeds the traversal order of point location.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Triangulation`](crate::core::triangulation::Triangulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangulationConfig {
    /// Maximum number of tetrahedra visited by one point-location walk
    pub walk_step_limit: usize,
    /// Maximum number of open triangles closed by one retriangulation
    pub organizer_step_limit: usize,
    /// Maximum number of tetrahedra popped by one Delaunay-restoration pass
    pub repair_step_limit: usize,
    /// Seed of the shuffled triangle visiting order
    pub traversal_seed: u64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        config_presets::general_simulation()
    }
}

impl TriangulationConfig {
    /// Returns a copy with a different traversal seed.
    #[must_use]
    pub const fn with_traversal_seed(mut self, seed: u64) -> Self {
        self.traversal_seed = seed;
        self
    }
}

/// Predefined configurations.
pub mod config_presets {
    use super::TriangulationConfig;

    /// Configuration for long-running simulations with many local moves.
    #[must_use]
    pub const fn general_simulation() -> TriangulationConfig {
        TriangulationConfig {
            walk_step_limit: 10_000,
            organizer_step_limit: 100_000,
            repair_step_limit: 1_000_000,
            traversal_seed: 0x5EED,
        }
    }

    /// Small limits that surface runaway loops quickly, intended for tests.
    #[must_use]
    pub const fn strict_limits() -> TriangulationConfig {
        TriangulationConfig {
            walk_step_limit: 1_000,
            organizer_step_limit: 2_000,
            repair_step_limit: 50_000,
            traversal_seed: 0x5EED,
        }
    }

    /// General limits with a fixed alternative seed, for reproducing a run with a
    /// different but deterministic walk.
    #[must_use]
    pub const fn deterministic_walk(seed: u64) -> TriangulationConfig {
        general_simulation().with_traversal_seed(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_general_simulation() {
        assert_eq!(
            TriangulationConfig::default(),
            config_presets::general_simulation()
        );
    }

    #[test]
    fn test_presets_are_ordered() {
        let strict = config_presets::strict_limits();
        let general = config_presets::general_simulation();
        assert!(strict.walk_step_limit < general.walk_step_limit);
        assert!(strict.organizer_step_limit < general.organizer_step_limit);
        assert_eq!(config_presets::deterministic_walk(7).traversal_seed, 7);
    }

    #[test]
    fn test_config_serializes() {
        let json = serde_json::to_string(&TriangulationConfig::default()).unwrap();
        let back: TriangulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TriangulationConfig::default());
    }
}
