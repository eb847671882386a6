//! Order-independent keys over node ids.
//!
//! [`TriangleHashKey`] deduplicates triangles while a cavity is being closed;
//! [`EdgeHashKey`] tracks the open boundary edges while cospherical points are
//! triangulated. Both are value types over node ids and hold no ownership of the
//! mesh.

use std::hash::{Hash, Hasher};

use nalgebra::Vector3;

use crate::core::triangulation::NodeKey;

/// Id used in place of a missing (infinite) node.
const NULL_ID: i64 = -1;

#[inline]
fn id_or_null(id: Option<u64>) -> i64 {
    id.and_then(|v| i64::try_from(v).ok()).unwrap_or(NULL_ID)
}

// =============================================================================
// TRIANGLE KEY
// =============================================================================

/// Key identifying a triangle by the unordered triple of its node ids.
#[derive(Debug, Clone, Copy, Eq)]
pub struct TriangleHashKey {
    sorted_ids: [i64; 3],
    hash_code: i64,
}

impl TriangleHashKey {
    /// Builds a key from three optional node ids; `None` stands for the infinite
    /// node.
    #[must_use]
    pub fn new(a: Option<u64>, b: Option<u64>, c: Option<u64>) -> Self {
        let ids = [id_or_null(a), id_or_null(b), id_or_null(c)];
        let mut sorted_ids = ids;
        sorted_ids.sort_unstable();
        let min = sorted_ids[0];
        let max = sorted_ids[2];
        let hash_code = (min
            .wrapping_mul(31)
            .wrapping_add(max.wrapping_mul(11))
            .wrapping_add(ids[0])
            .wrapping_add(ids[1])
            .wrapping_add(ids[2]))
            % 2_000_000_001;
        Self {
            sorted_ids,
            hash_code,
        }
    }

    /// The symmetric hash code of the three ids.
    #[inline]
    #[must_use]
    pub const fn hash_code(&self) -> i64 {
        self.hash_code
    }
}

impl PartialEq for TriangleHashKey {
    fn eq(&self, other: &Self) -> bool {
        self.sorted_ids == other.sorted_ids
    }
}

impl Hash for TriangleHashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code.hash(state);
    }
}

// =============================================================================
// EDGE KEY
// =============================================================================

/// Key identifying an open edge on the boundary of a partially triangulated
/// circle or sphere.
///
/// Besides the endpoints it remembers the edge direction and the unit normal of
/// the last triangle attached to the edge, so that candidate apexes can be ranked
/// by the cosine of their dihedral angle.
#[derive(Debug, Clone, Copy)]
pub struct EdgeHashKey {
    a: NodeKey,
    b: NodeKey,
    low_id: u64,
    high_id: u64,
    a_position: Vector3<f64>,
    ab: Vector3<f64>,
    last_normal: Vector3<f64>,
}

impl EdgeHashKey {
    /// Creates a key for the edge `a`–`b` whose last attached triangle has
    /// `opposite` as third vertex.
    #[must_use]
    pub fn new(
        (a, a_id, a_position): (NodeKey, u64, Vector3<f64>),
        (b, b_id, b_position): (NodeKey, u64, Vector3<f64>),
        opposite_position: Vector3<f64>,
    ) -> Self {
        let ab = b_position - a_position;
        let last_normal = ab
            .cross(&(opposite_position - a_position))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros);
        Self {
            a,
            b,
            low_id: a_id.min(b_id),
            high_id: a_id.max(b_id),
            a_position,
            ab,
            last_normal,
        }
    }

    /// `max(id) · 11 + min(id) · 31`.
    #[inline]
    #[must_use]
    pub const fn hash_code(&self) -> u64 {
        self.high_id
            .wrapping_mul(11)
            .wrapping_add(self.low_id.wrapping_mul(31))
    }

    /// First endpoint, as given at construction.
    #[inline]
    #[must_use]
    pub const fn endpoint_a(&self) -> NodeKey {
        self.a
    }

    /// Second endpoint, as given at construction.
    #[inline]
    #[must_use]
    pub const fn endpoint_b(&self) -> NodeKey {
        self.b
    }

    /// The endpoint that is not `node`, if `node` is an endpoint.
    #[must_use]
    pub fn opposite_node(&self, node: NodeKey) -> Option<NodeKey> {
        if node == self.a {
            Some(self.b)
        } else if node == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Cosine between the last attached triangle and the triangle the edge would
    /// form with `fourth_point`. Values within `1e-9` of ±1 snap to ±1.
    #[must_use]
    pub fn cosine(&self, fourth_point: &Vector3<f64>) -> f64 {
        let normal = self
            .ab
            .cross(&(fourth_point - self.a_position))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros);
        let cosine = normal.dot(&self.last_normal);
        if cosine > 0.999_999_999 {
            1.0
        } else if cosine < -0.999_999_99 {
            -1.0
        } else {
            cosine
        }
    }
}

impl PartialEq for EdgeHashKey {
    fn eq(&self, other: &Self) -> bool {
        self.low_id == other.low_id && self.high_id == other.high_id
    }
}

impl Eq for EdgeHashKey {}

impl Hash for EdgeHashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collections::FastHashSet;
    use slotmap::SlotMap;

    #[test]
    fn test_triangle_key_is_order_independent() {
        let k1 = TriangleHashKey::new(Some(3), Some(7), Some(11));
        let k2 = TriangleHashKey::new(Some(11), Some(3), Some(7));
        assert_eq!(k1, k2);
        assert_eq!(k1.hash_code(), k2.hash_code());
        assert_eq!(k1.hash_code(), 3 * 31 + 11 * 11 + 3 + 7 + 11);

        let mut set = FastHashSet::default();
        set.insert(k1);
        assert!(set.contains(&k2));
    }

    #[test]
    fn test_triangle_key_with_infinite_node() {
        let k1 = TriangleHashKey::new(None, Some(4), Some(9));
        let k2 = TriangleHashKey::new(Some(9), None, Some(4));
        assert_eq!(k1, k2);
        assert_eq!(k1.hash_code(), -31 + 9 * 11 - 1 + 4 + 9);
        assert_ne!(k1, TriangleHashKey::new(Some(1), Some(4), Some(9)));
    }

    #[test]
    fn test_edge_key_equality_and_cosine() {
        let mut keys: SlotMap<NodeKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let pa = Vector3::new(0.0, 0.0, 0.0);
        let pb = Vector3::new(1.0, 0.0, 0.0);
        let up = Vector3::new(0.5, 1.0, 0.0);

        let e1 = EdgeHashKey::new((a, 1, pa), (b, 2, pb), up);
        let e2 = EdgeHashKey::new((b, 2, pb), (a, 1, pa), up);
        assert_eq!(e1, e2);
        assert_eq!(e1.hash_code(), 2 * 11 + 31);
        assert_eq!(e1.opposite_node(a), Some(b));

        approx::assert_relative_eq!(e1.cosine(&Vector3::new(0.3, 2.0, 0.0)), 1.0);
        approx::assert_relative_eq!(e1.cosine(&Vector3::new(0.3, -2.0, 0.0)), -1.0);
        approx::assert_relative_eq!(e1.cosine(&Vector3::new(0.3, 0.0, 1.0)), 0.0, epsilon = 1e-12);
    }
}
