//! Bistellar flips on tetrahedra.
//!
//! - [`flip2to3`](Triangulation::flip2to3) replaces two tetrahedra sharing a
//!   triangle by three tetrahedra around the edge joining their apices.
//! - [`flip3to2`](Triangulation::flip3to2) is the inverse. Three tetrahedra
//!   around a common edge become two tetrahedra sharing a triangle.
//! - [`remove_2_flat_tetrahedra`](Triangulation::remove_2_flat_tetrahedra)
//!   collapses two flat tetrahedra sharing two triangles by gluing their outer
//!   triangles together.
//!
//! A flip only rewires the mesh. Whether a flip is wanted is decided by the
//! repair loop in [`crate::core::algorithms::repair`].

use crate::core::collections::TetrahedronBuffer;
use crate::core::tetrahedron::edge_number;
use crate::core::triangulation::{
    NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError,
};
use crate::geometry::predicates::Orientation;

impl<U> Triangulation<U> {
    // =========================================================================
    // NEIGHBOURHOOD HELPERS
    // =========================================================================

    /// Slot of the triangle of `tetrahedron` shared with `other`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] if the two are not neighbours.
    pub fn connecting_triangle_number(
        &self,
        tetrahedron: TetrahedronKey,
        other: TetrahedronKey,
    ) -> Result<usize, TriangulationError> {
        let triangles = self.tetrahedron_ref(tetrahedron)?.triangles();
        for (slot, triangle) in triangles.into_iter().enumerate() {
            if self.triangle_ref(triangle)?.is_adjacent_to_tetrahedron(other) {
                return Ok(slot);
            }
        }
        Err(TriangulationError::topology(format!(
            "{tetrahedron:?} and {other:?} share no triangle"
        )))
    }

    /// The triangle of `tetrahedron` shared with `other`.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] if the two are not neighbours.
    pub fn connecting_triangle(
        &self,
        tetrahedron: TetrahedronKey,
        other: TetrahedronKey,
    ) -> Result<TriangleKey, TriangulationError> {
        let slot = self.connecting_triangle_number(tetrahedron, other)?;
        Ok(self.tetrahedron_ref(tetrahedron)?.triangles()[slot])
    }

    /// For each node of `base`, the triangle of `tetrahedron` opposite it.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::InvalidTopology`] if `base` is not a face of
    /// `tetrahedron`.
    pub fn touching_triangles(
        &self,
        tetrahedron: TetrahedronKey,
        base: TriangleKey,
    ) -> Result<[TriangleKey; 3], TriangulationError> {
        let tet = self.tetrahedron_ref(tetrahedron)?;
        let nodes = self.triangle_ref(base)?.nodes();
        let mut touching = [base; 3];
        for (slot, node) in touching.iter_mut().zip(nodes) {
            *slot = tet.opposite_triangle(node).ok_or_else(|| {
                TriangulationError::topology(format!(
                    "triangle {base:?} is not a face of {tetrahedron:?}"
                ))
            })?;
        }
        Ok(touching)
    }

    // =========================================================================
    // FLIPS
    // =========================================================================

    /// Replaces `a` and `b`, which share a triangle, by three tetrahedra around
    /// the edge between their apices.
    ///
    /// Returns `None`, leaving the mesh untouched, when the union of `a` and `b`
    /// is not convex. When the apex of `b` lies on the plane of a face of `a`,
    /// the tetrahedron built over that face is flat.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::DegenerateFlipRejected`], before any change, when
    /// `a` and `b` coincide or span the same nodes.
    /// [`TriangulationError::InvalidTopology`] if `a` and `b` are not
    /// neighbours.
    pub fn flip2to3(
        &mut self,
        a: TetrahedronKey,
        b: TetrahedronKey,
    ) -> Result<Option<[TetrahedronKey; 3]>, TriangulationError> {
        if a == b {
            return Err(TriangulationError::DegenerateFlipRejected {
                message: format!("2-3 flip of {a:?} with itself"),
            });
        }
        let connecting_number = self.connecting_triangle_number(a, b)?;
        let connecting = self.tetrahedron_ref(a)?.triangles()[connecting_number];
        let Some(Some(lower)) = self.tetrahedron_ref(b)?.opposite_node(connecting) else {
            return Ok(None);
        };
        if self.tetrahedron_ref(a)?.is_adjacent_to(Some(lower)) {
            return Err(TriangulationError::DegenerateFlipRejected {
                message: format!("{a:?} and {b:?} span the same four nodes"),
            });
        }
        let lower_position = self.position(lower)?;
        let convex = self.is_in_convex_position(a, &lower_position, connecting_number)?;
        if convex == Orientation::NEGATIVE {
            return Ok(None);
        }
        let check_for_flat = convex == Orientation::DEGENERATE;
        let upper_triangles = self.touching_triangles(a, connecting)?;
        let lower_triangles = self.touching_triangles(b, connecting)?;
        let upper = self.tetrahedron_ref(a)?.nodes()[connecting_number];
        let base_nodes = self.triangle_ref(connecting)?.nodes();
        if upper.is_none() || base_nodes[1].is_none() || base_nodes[2].is_none() {
            return Err(TriangulationError::DegenerateFlipRejected {
                message: format!("2-3 flip of {a:?} and {b:?} would misplace the infinite node"),
            });
        }
        let mut flat = [false; 3];
        for (i, triangle) in upper_triangles.iter().enumerate() {
            if check_for_flat {
                let points = self.finite_triangle_points(*triangle)?;
                flat[i] = self.triangle_ref(*triangle)?.orientation(
                    &points,
                    &lower_position,
                    &lower_position,
                ) == Orientation::DEGENERATE;
            }
        }

        let new_triangles = base_nodes.map(|node| self.create_triangle([upper, Some(lower), node]));
        self.remove_tetrahedron(a)?;
        self.remove_tetrahedron(b)?;
        let mut created = [a; 3];
        for i in 0..3 {
            // a base node in slot 0 (the infinite one) must stay in slot 0
            let (first, last) = match ((i + 1) % 3, (i + 2) % 3) {
                (_, 0) => (0, 2),
                pair => pair,
            };
            created[i] = self.create_tetrahedron_from_parts(
                [
                    new_triangles[last],
                    upper_triangles[i],
                    lower_triangles[i],
                    new_triangles[first],
                ],
                [base_nodes[first], Some(lower), upper, base_nodes[last]],
                flat[i],
            )?;
        }
        self.collect_orphaned_triangles();
        Ok(Some(created))
    }

    /// Replaces `a`, `b` and `c`, which pairwise share a triangle, by two
    /// tetrahedra sharing the triangle through the three nodes not on their
    /// common edge. Three flat inputs give two flat outputs.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::DegenerateFlipRejected`], before any change, when
    /// two inputs are the same tetrahedron or the infinite node would end up
    /// outside slot 0.
    /// [`TriangulationError::InvalidTopology`] if the three are not pairwise
    /// neighbours.
    pub fn flip3to2(
        &mut self,
        a: TetrahedronKey,
        b: TetrahedronKey,
        c: TetrahedronKey,
    ) -> Result<[TetrahedronKey; 2], TriangulationError> {
        if a == b || b == c || a == c {
            return Err(TriangulationError::DegenerateFlipRejected {
                message: format!("3-2 flip needs three distinct tetrahedra, got {a:?}, {b:?} and {c:?}"),
            });
        }
        let ring = [
            self.tetrahedron_ref(a)?.nodes()[self.connecting_triangle_number(a, b)?],
            self.tetrahedron_ref(b)?.nodes()[self.connecting_triangle_number(b, c)?],
            self.tetrahedron_ref(c)?.nodes()[self.connecting_triangle_number(c, a)?],
        ];
        let tet_a = self.tetrahedron_ref(a)?;
        let (Some(upper), Some(lower)) = (
            tet_a.first_other_node(ring[0], ring[1]),
            tet_a.second_other_node(ring[0], ring[1]),
        ) else {
            return Err(TriangulationError::topology(format!(
                "{a:?}, {b:?} and {c:?} do not surround a common edge"
            )));
        };
        if ring.iter().any(Option::is_none) {
            return Err(TriangulationError::DegenerateFlipRejected {
                message: format!("3-2 flip of {a:?}, {b:?} and {c:?} would misplace the infinite node"),
            });
        }
        let opposite = |tet: TetrahedronKey, node: Option<NodeKey>| {
            self.tetrahedron_ref(tet)?
                .opposite_triangle(node)
                .ok_or_else(|| TriangulationError::topology("3-2 flip input does not contain its edge"))
        };
        let below = [opposite(a, lower)?, opposite(b, lower)?, opposite(c, lower)?];
        let above = [opposite(a, upper)?, opposite(b, upper)?, opposite(c, upper)?];
        let flat = [a, b, c]
            .iter()
            .map(|&t| self.tetrahedron_ref(t).map(|t| t.is_flat()))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .all(|f| f);

        let new_triangle = self.create_triangle(ring);
        self.remove_tetrahedron(a)?;
        self.remove_tetrahedron(b)?;
        self.remove_tetrahedron(c)?;
        let first = self.create_tetrahedron_from_parts(
            [new_triangle, below[0], below[1], below[2]],
            [upper, ring[2], ring[0], ring[1]],
            flat,
        )?;
        let second = self.create_tetrahedron_from_parts(
            [new_triangle, above[0], above[1], above[2]],
            [lower, ring[2], ring[0], ring[1]],
            flat,
        )?;
        self.collect_orphaned_triangles();
        Ok([first, second])
    }

    /// Collapses two flat tetrahedra that share two triangles.
    ///
    /// Both are removed and each outer triangle of `a` is replaced, in the
    /// tetrahedron beyond it, by the coinciding outer triangle of `b`. Returns
    /// the tetrahedra around the collapsed pair.
    ///
    /// # Errors
    ///
    /// [`TriangulationError::DegenerateFlipRejected`], before any change, when
    /// `a` and `b` coincide or an outer triangle has no tetrahedron beyond it.
    /// [`TriangulationError::InvalidTopology`] if an outer triangle has no
    /// counterpart in `b`.
    pub fn remove_2_flat_tetrahedra(
        &mut self,
        a: TetrahedronKey,
        b: TetrahedronKey,
    ) -> Result<TetrahedronBuffer, TriangulationError> {
        let rejected = |reason: &str| TriangulationError::DegenerateFlipRejected {
            message: format!("flat pair {a:?} and {b:?} {reason}"),
        };
        if a == b {
            return Err(rejected("is a single tetrahedron"));
        }
        let triangles_a = self.tetrahedron_ref(a)?.triangles();
        let triangles_b = self.tetrahedron_ref(b)?.triangles();
        let mut outer = Vec::with_capacity(2);
        for triangle in triangles_a {
            if triangles_b.contains(&triangle) {
                continue;
            }
            let mut counterpart = None;
            for other in triangles_b {
                if self.triangle_ref(triangle)?.is_similar_to(self.triangle_ref(other)?) {
                    counterpart = Some(other);
                }
            }
            let counterpart = counterpart.ok_or_else(|| {
                TriangulationError::topology(format!(
                    "outer triangle {triangle:?} of {a:?} has no counterpart in {b:?}"
                ))
            })?;
            let beyond_a = self.tetrahedron_across(triangle, Some(a))?;
            let beyond_b = self.tetrahedron_across(counterpart, Some(b))?;
            let (Some(beyond_a), Some(beyond_b)) = (beyond_a, beyond_b) else {
                return Err(rejected("has an open outer triangle"));
            };
            if beyond_a == beyond_b || [a, b].contains(&beyond_a) || [a, b].contains(&beyond_b) {
                return Err(rejected("is glued to itself"));
            }
            outer.push((triangle, counterpart, beyond_a, beyond_b));
        }
        self.remove_tetrahedron(a)?;
        self.remove_tetrahedron(b)?;

        let mut adjacent = TetrahedronBuffer::new();
        for (from_a, from_b, beyond_a, beyond_b) in outer {
            for tetrahedron in [beyond_a, beyond_b] {
                if !adjacent.contains(&tetrahedron) {
                    adjacent.push(tetrahedron);
                }
            }
            self.replace_triangle(beyond_a, from_a, from_b)?;
        }
        self.collect_orphaned_triangles();
        Ok(adjacent)
    }

    /// Swaps triangle `old` of `tetrahedron` for the coinciding triangle `new`.
    ///
    /// The edges around the swapped slot are rederived from the tetrahedron on
    /// the other side of `new`, carrying this tetrahedron's cross-section
    /// contribution with them.
    pub(crate) fn replace_triangle(
        &mut self,
        tetrahedron: TetrahedronKey,
        old: TriangleKey,
        new: TriangleKey,
    ) -> Result<(), TriangulationError> {
        self.triangle_mut(new)?.add_tetrahedron(tetrahedron);
        let tet = self.tetrahedron_ref(tetrahedron)?.clone();
        let slot = tet.triangle_number(old).ok_or_else(|| {
            TriangulationError::topology(format!("triangle {old:?} is not a face of {tetrahedron:?}"))
        })?;
        if !tet.is_infinite() {
            let mut position = (slot + 2) % 4;
            let mut last_position = (slot + 1) % 4;
            for _ in 0..3 {
                let index = edge_number(last_position, position);
                if let (Some(p), Some(q)) = (tet.nodes[last_position], tet.nodes[position]) {
                    let replacement = self.search_edge(p, q)?;
                    if tet.edges[index] != Some(replacement) {
                        let area = tet.cross_section_areas[index];
                        if let Some(previous) = tet.edges[index] {
                            if let Some(edge) = self.edges.get_mut(previous) {
                                edge.change_cross_section_area(-area);
                            }
                            self.detach_edge(previous, tetrahedron);
                        }
                        if let Some(edge) = self.edges.get_mut(replacement) {
                            edge.add_tetrahedron(tetrahedron);
                            edge.change_cross_section_area(area);
                        }
                        self.tetrahedron_mut(tetrahedron)?.edges[index] = Some(replacement);
                    }
                }
                last_position = position;
                position = (position + 1) % 4;
                if position == slot {
                    position = (position + 1) % 4;
                }
            }
        }
        self.tetrahedron_mut(tetrahedron)?.triangles[slot] = new;
        self.triangle_mut(new)?.reset_checked();
        let old_triangle = self.triangle_mut(old)?;
        old_triangle.remove_tetrahedron(tetrahedron);
        if old_triangle.is_completely_open() {
            self.orphaned_triangles.push(old);
        }
        Ok(())
    }
}
