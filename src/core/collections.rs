//! Collection aliases used throughout the mesh.

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::core::triangulation::{TetrahedronKey, TriangleKey};

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Arena storage for nodes, edges, triangles and tetrahedra.
///
/// Generational keys make handles to removed elements miss instead of aliasing
/// newly inserted ones.
pub type StorageMap<K, V> = SlotMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// Optimized `HashMap` type for performance-critical operations.
///
/// Keys in this crate are integers or small id tuples, for which `FxHash` is much
/// faster than the default SipHash.
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// Optimized `HashSet` type for performance-critical operations.
pub type FastHashSet<T> = FxHashSet<T>;

/// Stack-first vector for small collections.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

// =============================================================================
// DOMAIN BUFFERS
// =============================================================================

/// Tetrahedra touched by a single local operation (flip results, neighbours).
pub type TetrahedronBuffer = SmallBuffer<TetrahedronKey, 8>;

/// Triangles exposed by a single local operation.
pub type TriangleBuffer = SmallBuffer<TriangleKey, 8>;

/// Creates a [`FastHashMap`] with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

/// Removes the first occurrence of `value` from `vec`, preserving order.
///
/// Returns whether an element was removed.
pub fn remove_first<T: PartialEq>(vec: &mut Vec<T>, value: &T) -> bool {
    if let Some(pos) = vec.iter().position(|v| v == value) {
        vec.remove(pos);
        true
    } else {
        false
    }
}
