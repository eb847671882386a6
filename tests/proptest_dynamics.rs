//! Property-based tests: random insert / move / remove sequences keep the
//! mesh valid and Delaunay.

#![forbid(unsafe_code)]

use proptest::prelude::*;
use spatial_organization::prelude::*;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn point() -> impl Strategy<Value = [f64; 3]> {
    prop::array::uniform3(0.0..10.0f64)
}

fn delta() -> impl Strategy<Value = [f64; 3]> {
    prop::array::uniform3(-0.5..0.5f64)
}

/// Inserts `points`, rejecting the case when the first four are coplanar or a
/// position repeats.
fn build(points: &[[f64; 3]]) -> Result<(Triangulation<usize>, Vec<NodeKey>), TestCaseError> {
    let mut mesh = Triangulation::with_config(config_presets::strict_limits());
    let mut keys = Vec::with_capacity(points.len());
    for (i, &p) in points.iter().enumerate() {
        match mesh.insert_node(p, i) {
            Ok(key) => keys.push(key),
            Err(
                TriangulationError::DegenerateInitialSimplex
                | TriangulationError::PositionNotAllowed { .. },
            ) => return Err(TestCaseError::reject("degenerate input")),
            Err(e) => return Err(TestCaseError::fail(format!("insert {i} failed: {e}"))),
        }
    }
    Ok((mesh, keys))
}

fn check(mesh: &Triangulation<usize>) -> Result<(), TestCaseError> {
    if let Err(violation) = validate_topology(mesh) {
        return Err(TestCaseError::fail(violation.to_string()));
    }
    let violations = find_delaunay_violations(mesh).map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(violations.is_empty(), "{} Delaunay violations", violations.len());
    for (node, _) in mesh.nodes() {
        let neighbours = mesh.neighbor_nodes(node).map_err(|e| TestCaseError::fail(e.to_string()))?;
        for other in neighbours {
            let back = mesh.neighbor_nodes(other).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(back.contains(&node));
        }
    }
    for (edge, _) in mesh.edges() {
        let area = mesh.edge_cross_section(edge).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(area >= -1e-6, "negative cross section {area}");
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_insertion_is_delaunay(points in prop::collection::vec(point(), 5..25)) {
        init_tracing();
        let (mesh, _) = build(&points)?;
        prop_assert_eq!(mesh.number_of_nodes(), points.len());
        check(&mesh)?;
        let total: f64 = mesh.nodes().map(|(_, n)| n.volume()).sum();
        let hull: f64 = mesh.tetrahedra().filter(|(_, t)| !t.is_infinite()).map(|(_, t)| t.volume()).sum();
        prop_assert!((total - hull).abs() <= 1e-6 * hull.max(1.0));
    }

    #[test]
    fn prop_moves_keep_the_mesh_delaunay(
        points in prop::collection::vec(point(), 6..20),
        moves in prop::collection::vec((0usize..100, delta()), 1..12),
    ) {
        init_tracing();
        let (mut mesh, keys) = build(&points)?;
        for (index, d) in moves {
            let node = keys[index % keys.len()];
            match mesh.move_from(node, d) {
                Ok(()) | Err(TriangulationError::PositionNotAllowed { .. }) => {}
                Err(TriangulationError::DegenerateInitialSimplex) => {
                    return Err(TestCaseError::reject("degenerate initial simplex"));
                }
                Err(e) => return Err(TestCaseError::fail(format!("move failed: {e}"))),
            }
            check(&mesh)?;
        }
    }

    #[test]
    fn prop_removals_keep_the_mesh_delaunay(
        points in prop::collection::vec(point(), 6..20),
        removals in prop::collection::vec(0usize..100, 1..5),
    ) {
        init_tracing();
        let (mut mesh, mut keys) = build(&points)?;
        for index in removals {
            if keys.len() <= 5 {
                break;
            }
            let node = keys.remove(index % keys.len());
            mesh.remove_node(node).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(mesh.node(node).is_none());
            check(&mesh)?;
        }
        prop_assert_eq!(mesh.number_of_nodes(), keys.len());
    }
}
