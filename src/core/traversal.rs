//! Order in which a point-location walk visits the faces of a tetrahedron.
//!
//! A visibility walk that always inspects the faces in the same order can cycle
//! in degenerate configurations. [`ShuffledOrder`] randomizes the order on every
//! step from a seeded generator, so runs stay reproducible.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Source of face permutations for the point-location walk.
pub trait TriangleOrder: Send + Sync {
    /// The next permutation of `0..4`.
    fn next_order(&mut self) -> [usize; 4];
}

/// Always `[0, 1, 2, 3]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequentialOrder;

impl SequentialOrder {
    /// The fixed permutation.
    pub const ORDER: [usize; 4] = [0, 1, 2, 3];
}

impl TriangleOrder for SequentialOrder {
    fn next_order(&mut self) -> [usize; 4] {
        Self::ORDER
    }
}

/// Uniformly shuffled permutations from a seeded [`StdRng`].
#[derive(Debug, Clone)]
pub struct ShuffledOrder {
    rng: StdRng,
}

impl ShuffledOrder {
    /// Creates a shuffled order from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TriangleOrder for ShuffledOrder {
    fn next_order(&mut self) -> [usize; 4] {
        let mut order = SequentialOrder::ORDER;
        order.shuffle(&mut self.rng);
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_order() {
        let mut order = SequentialOrder;
        assert_eq!(order.next_order(), [0, 1, 2, 3]);
        assert_eq!(order.next_order(), [0, 1, 2, 3]);
    }

    #[test]
    fn test_shuffled_order_is_a_reproducible_permutation() {
        let mut a = ShuffledOrder::new(42);
        let mut b = ShuffledOrder::new(42);
        for _ in 0..32 {
            let next = a.next_order();
            assert_eq!(next, b.next_order());
            let mut sorted = next;
            sorted.sort_unstable();
            assert_eq!(sorted, [0, 1, 2, 3]);
        }
    }
}
