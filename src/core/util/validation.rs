//! Consistency checks for a [`Triangulation`].
//!
//! [`validate_topology`] checks the incidence structure (back references
//! between nodes, edges, triangles and tetrahedra, and the infinite slot-0
//! rule). [`find_delaunay_violations`] checks the empty-sphere property by
//! brute force. Both are intended for tests and debugging, not for hot paths.

use thiserror::Error;

use crate::core::tetrahedron::EDGE_NODE_PAIRS;
use crate::core::triangulation::{
    EdgeKey, NodeKey, TetrahedronKey, TriangleKey, Triangulation, TriangulationError,
};

/// An inconsistency in the incidence structure of a triangulation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TopologyViolation {
    /// A tetrahedron refers to an element that is not in the arena.
    #[error("Tetrahedron {tetrahedron:?} refers to a missing {element}")]
    DanglingReference {
        /// The tetrahedron holding the reference.
        tetrahedron: TetrahedronKey,
        /// Kind of the missing element.
        element: &'static str,
    },
    /// A node slot other than slot 0 is infinite.
    #[error("Tetrahedron {tetrahedron:?} has the infinite node outside slot 0")]
    MisplacedInfiniteNode {
        /// The offending tetrahedron.
        tetrahedron: TetrahedronKey,
    },
    /// Triangle `slot` does not consist of the three nodes other than node `slot`.
    #[error("Triangle {slot} of tetrahedron {tetrahedron:?} does not lie opposite node {slot}")]
    FaceMismatch {
        /// The offending tetrahedron.
        tetrahedron: TetrahedronKey,
        /// Slot of the mismatching triangle.
        slot: usize,
    },
    /// A tetrahedron and one of its triangles, nodes or edges disagree about
    /// their incidence.
    #[error("{element} {key} and tetrahedron {tetrahedron:?} disagree about their incidence")]
    MissingBackReference {
        /// The tetrahedron.
        tetrahedron: TetrahedronKey,
        /// Kind of the other element.
        element: &'static str,
        /// Debug rendering of the other element's key.
        key: String,
    },
    /// A triangle is not shared by exactly two tetrahedra.
    #[error("Triangle {triangle:?} is not closed")]
    OpenTriangle {
        /// The offending triangle.
        triangle: TriangleKey,
    },
    /// An edge is not listed by one of its endpoints, or refers to a missing one.
    #[error("Edge {edge:?} and its endpoints disagree about their incidence")]
    EdgeEndpoint {
        /// The offending edge.
        edge: EdgeKey,
    },
    /// An edge of a meshed triangulation belongs to no tetrahedron.
    #[error("Edge {edge:?} belongs to no tetrahedron")]
    UnusedEdge {
        /// The offending edge.
        edge: EdgeKey,
    },
    /// A tetrahedron and the triangle it shares with a neighbour do not map
    /// back to each other.
    #[error("Tetrahedra {a:?} and {b:?} are not symmetric neighbours")]
    AsymmetricNeighbours {
        /// One tetrahedron.
        a: TetrahedronKey,
        /// The other.
        b: TetrahedronKey,
    },
}

/// Checks the incidence structure of `mesh`.
///
/// # Errors
///
/// The first [`TopologyViolation`] found.
pub fn validate_topology<U>(mesh: &Triangulation<U>) -> Result<(), TopologyViolation> {
    for (key, tet) in mesh.tetrahedra() {
        validate_tetrahedron(mesh, key)?;
        for triangle in tet.triangles() {
            let Some(t) = mesh.triangle(triangle) else {
                continue;
            };
            if let Some(Some(neighbour)) = t.opposite_tetrahedron(Some(key)) {
                let symmetric = mesh
                    .tetrahedron(neighbour)
                    .is_some_and(|n| n.triangles().contains(&triangle));
                if !symmetric {
                    return Err(TopologyViolation::AsymmetricNeighbours { a: key, b: neighbour });
                }
            }
        }
    }

    for (key, triangle) in mesh.triangles() {
        if !triangle.is_closed() {
            return Err(TopologyViolation::OpenTriangle { triangle: key });
        }
        for tetrahedron in triangle.tetrahedra().into_iter().flatten() {
            let uses = mesh
                .tetrahedron(tetrahedron)
                .is_some_and(|t| t.triangles().contains(&key));
            if !uses {
                return Err(TopologyViolation::MissingBackReference {
                    tetrahedron,
                    element: "triangle",
                    key: format!("{key:?}"),
                });
            }
        }
    }

    let meshed = mesh.number_of_tetrahedra() > 0;
    for (key, edge) in mesh.edges() {
        let (a, b) = edge.endpoints();
        for endpoint in [a, b] {
            let listed = mesh.node(endpoint).is_some_and(|n| n.edges().contains(&key));
            if !listed {
                return Err(TopologyViolation::EdgeEndpoint { edge: key });
            }
        }
        if meshed && edge.adjacent_tetrahedra().is_empty() {
            return Err(TopologyViolation::UnusedEdge { edge: key });
        }
        for &tetrahedron in edge.adjacent_tetrahedra() {
            let contains = mesh.tetrahedron(tetrahedron).is_some_and(|t| {
                t.is_adjacent_to(Some(a)) && t.is_adjacent_to(Some(b)) && t.edges().contains(&Some(key))
            });
            if !contains {
                return Err(TopologyViolation::MissingBackReference {
                    tetrahedron,
                    element: "edge",
                    key: format!("{key:?}"),
                });
            }
        }
    }

    for (key, node) in mesh.nodes() {
        for &tetrahedron in node.adjacent_tetrahedra() {
            if !mesh.tetrahedron(tetrahedron).is_some_and(|t| t.is_adjacent_to(Some(key))) {
                return Err(TopologyViolation::MissingBackReference {
                    tetrahedron,
                    element: "node",
                    key: format!("{key:?}"),
                });
            }
        }
    }
    Ok(())
}

fn validate_tetrahedron<U>(
    mesh: &Triangulation<U>,
    key: TetrahedronKey,
) -> Result<(), TopologyViolation> {
    let dangling = |element| TopologyViolation::DanglingReference {
        tetrahedron: key,
        element,
    };
    let tet = mesh.tetrahedron(key).ok_or(dangling("tetrahedron"))?;
    let nodes = tet.nodes();
    if nodes[1..].iter().any(Option::is_none) {
        return Err(TopologyViolation::MisplacedInfiniteNode { tetrahedron: key });
    }
    for (slot, triangle) in tet.triangles().into_iter().enumerate() {
        let t = mesh.triangle(triangle).ok_or(dangling("triangle"))?;
        if !t.is_adjacent_to_tetrahedron(key) {
            return Err(TopologyViolation::MissingBackReference {
                tetrahedron: key,
                element: "triangle",
                key: format!("{triangle:?}"),
            });
        }
        let face_matches = (0..4)
            .filter(|&other| other != slot)
            .all(|other| t.is_adjacent_to_node(nodes[other]))
            && !t.is_adjacent_to_node(nodes[slot]);
        if !face_matches {
            return Err(TopologyViolation::FaceMismatch { tetrahedron: key, slot });
        }
    }
    for node in nodes.into_iter().flatten() {
        let listed = mesh
            .node(node)
            .ok_or(dangling("node"))?
            .adjacent_tetrahedra()
            .contains(&key);
        if !listed {
            return Err(TopologyViolation::MissingBackReference {
                tetrahedron: key,
                element: "node",
                key: format!("{node:?}"),
            });
        }
    }
    if tet.is_infinite() {
        return Ok(());
    }
    for (index, &(i, j)) in EDGE_NODE_PAIRS.iter().enumerate() {
        let edge = tet.edges()[index].ok_or(dangling("edge"))?;
        let e = mesh.edge(edge).ok_or(dangling("edge"))?;
        let (Some(a), Some(b)) = (nodes[i], nodes[j]) else {
            return Err(TopologyViolation::MisplacedInfiniteNode { tetrahedron: key });
        };
        if !e.equals(a, b) || !e.adjacent_tetrahedra().contains(&key) {
            return Err(TopologyViolation::MissingBackReference {
                tetrahedron: key,
                element: "edge",
                key: format!("{edge:?}"),
            });
        }
    }
    Ok(())
}

/// Every pair of a tetrahedron and a node strictly inside its circumsphere.
///
/// Infinite tetrahedra take part with their hull half-space, so a node beyond
/// a hull face is reported too. Flat tetrahedra are skipped.
///
/// # Errors
///
/// Propagates predicate failures.
pub fn find_delaunay_violations<U>(
    mesh: &Triangulation<U>,
) -> Result<Vec<(TetrahedronKey, NodeKey)>, TriangulationError> {
    let mut violations = Vec::new();
    for (key, tet) in mesh.tetrahedra() {
        if tet.is_flat() {
            continue;
        }
        for (node, space_node) in mesh.nodes() {
            if tet.is_adjacent_to(Some(node)) {
                continue;
            }
            if mesh.is_truly_inside_sphere(key, &space_node.position())? {
                violations.push((key, node));
            }
        }
    }
    Ok(violations)
}

/// Whether no node lies strictly inside the circumsphere of any tetrahedron.
///
/// # Errors
///
/// Propagates predicate failures.
pub fn is_delaunay<U>(mesh: &Triangulation<U>) -> Result<bool, TriangulationError> {
    let violations = find_delaunay_violations(mesh)?;
    if let Some((tetrahedron, node)) = violations.first() {
        tracing::debug!(
            violations = violations.len(),
            ?tetrahedron,
            ?node,
            "Delaunay property violated"
        );
    }
    Ok(violations.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_state_is_valid() {
        let mut mesh: Triangulation<()> = Triangulation::new();
        mesh.insert_node([0.0, 0.0, 0.0], ()).unwrap();
        mesh.insert_node([1.0, 0.0, 0.0], ()).unwrap();
        validate_topology(&mesh).unwrap();
        assert!(is_delaunay(&mesh).unwrap());
    }

    #[test]
    fn test_cospherical_cube_is_delaunay() {
        let corners = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let mut mesh: Triangulation<usize> = Triangulation::new();
        for (i, corner) in corners.into_iter().enumerate() {
            mesh.insert_node(corner, i).unwrap();
        }
        validate_topology(&mesh).unwrap();
        assert!(find_delaunay_violations(&mesh).unwrap().is_empty());
        let volume: f64 = mesh.tetrahedra().map(|(_, t)| t.volume()).sum();
        approx::assert_relative_eq!(volume, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_violation_message() {
        let message = TopologyViolation::MisplacedInfiniteNode {
            tetrahedron: TetrahedronKey::default(),
        }
        .to_string();
        assert!(message.contains("slot 0"));
    }
}
