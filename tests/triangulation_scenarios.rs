//! Scenario tests for the dynamic triangulation.
//!
//! Each test drives the public API through a short insert / move / remove
//! sequence and checks the resulting mesh against a brute-force reference.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
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

// =============================================================================
// HELPERS
// =============================================================================

const CORNER: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];

const CLOUD: [[f64; 3]; 14] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.93, 0.81, 0.74],
    [0.31, 0.27, 0.22],
    [0.62, 0.11, 0.45],
    [0.14, 0.58, 0.36],
    [0.47, 0.49, 0.12],
    [0.22, 0.19, 0.71],
    [0.75, 0.33, 0.05],
    [0.05, 0.83, 0.81],
    [0.58, 0.71, 0.52],
    [0.39, 0.04, 0.88],
];

fn build(points: &[[f64; 3]]) -> (Triangulation<usize>, Vec<NodeKey>) {
    let mut mesh = Triangulation::new();
    let keys = points
        .iter()
        .enumerate()
        .map(|(i, &p)| mesh.insert_node(p, i).unwrap())
        .collect();
    (mesh, keys)
}

/// Sorted payload sets of all finite tetrahedra.
fn finite_sets(mesh: &Triangulation<usize>) -> Vec<Vec<usize>> {
    let mut sets: Vec<Vec<usize>> = mesh
        .tetrahedra()
        .filter(|(_, t)| !t.is_infinite())
        .map(|(key, _)| {
            let mut set: Vec<usize> = mesh
                .vertex_payloads(key)
                .unwrap()
                .into_iter()
                .flatten()
                .copied()
                .collect();
            set.sort_unstable();
            set
        })
        .collect();
    sets.sort();
    sets
}

fn assert_delaunay(mesh: &Triangulation<usize>) {
    validate_topology(mesh).unwrap();
    let violations = find_delaunay_violations(mesh).unwrap();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

// =============================================================================
// BOOTSTRAP AND INSERTION
// =============================================================================

#[test]
fn four_points_build_one_finite_and_four_infinite_tetrahedra() {
    init_tracing();
    let (mesh, _) = build(&CORNER);
    assert_eq!(mesh.number_of_tetrahedra(), 5);
    assert_eq!(mesh.number_of_finite_tetrahedra(), 1);

    let (finite, tet) = mesh.tetrahedra().find(|(_, t)| !t.is_infinite()).unwrap();
    for (key, infinite) in mesh.tetrahedra().filter(|(_, t)| t.is_infinite()) {
        let shared = infinite
            .triangles()
            .iter()
            .filter(|t| tet.triangles().contains(t))
            .count();
        assert_eq!(shared, 1, "{key:?} shares {shared} faces with {finite:?}");
        assert!(infinite.nodes()[0].is_none());
    }
    assert_delaunay(&mesh);
}

#[test]
fn interior_fifth_point_creates_a_fan_of_four() {
    init_tracing();
    let (mut mesh, _) = build(&CORNER);
    let e = mesh.insert_node([0.2, 0.25, 0.3], 4).unwrap();
    let sets = finite_sets(&mesh);
    assert_eq!(sets.len(), 4);
    assert!(sets.iter().all(|s| s.contains(&4)));
    assert!(!sets.contains(&vec![0, 1, 2, 3]));
    assert_eq!(mesh.neighbors(e).unwrap().len(), 4);
    let total: f64 = mesh.nodes().map(|(_, n)| n.volume()).sum();
    assert_relative_eq!(total, 1.0 / 6.0, epsilon = 1e-12);
    assert_delaunay(&mesh);
}

#[test]
fn point_cloud_is_delaunay_and_neighbours_are_symmetric() {
    init_tracing();
    let (mesh, keys) = build(&CLOUD);
    assert_delaunay(&mesh);
    for &node in &keys {
        for other in mesh.neighbor_nodes(node).unwrap() {
            assert!(mesh.neighbor_nodes(other).unwrap().contains(&node));
        }
    }
    for (edge, _) in mesh.edges() {
        assert!(mesh.edge_cross_section(edge).unwrap() >= -1e-12);
    }
}

#[test]
fn strict_limits_handle_a_point_cloud() {
    init_tracing();
    let mut mesh: Triangulation<usize> = Triangulation::with_config(config_presets::strict_limits());
    for (i, &p) in CLOUD.iter().enumerate() {
        mesh.insert_node(p, i).unwrap();
    }
    assert_delaunay(&mesh);
}

#[test]
fn sequential_walk_order_gives_the_same_mesh() {
    init_tracing();
    let (shuffled, _) = build(&CLOUD);
    let mut sequential: Triangulation<usize> =
        Triangulation::with_triangle_order(TriangulationConfig::default(), Box::new(SequentialOrder));
    for (i, &p) in CLOUD.iter().enumerate() {
        sequential.insert_node(p, i).unwrap();
    }
    assert_eq!(finite_sets(&sequential), finite_sets(&shuffled));
}

#[test]
fn duplicate_position_is_refused_with_a_suggestion() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    let before = finite_sets(&mesh);
    let occupied = mesh.position(keys[6]).unwrap();
    match mesh.insert_node_near(keys[0], occupied, 99) {
        Err(TriangulationError::PositionNotAllowed { node, suggestion, .. }) => {
            assert_eq!(node, keys[6]);
            mesh.insert_node(suggestion, 99).unwrap();
        }
        other => panic!("expected PositionNotAllowed, got {other:?}"),
    }
    assert!(finite_sets(&mesh).len() > before.len());
    assert_delaunay(&mesh);
}

// =============================================================================
// REMOVAL
// =============================================================================

#[test]
fn insert_then_remove_restores_the_mesh() {
    init_tracing();
    let (mut mesh, _) = build(&CLOUD);
    let before = finite_sets(&mesh);
    let edges = mesh.number_of_edges();
    let extra = mesh.insert_node([0.33, 0.41, 0.29], 100).unwrap();
    assert_ne!(finite_sets(&mesh), before);
    assert_eq!(mesh.remove_node(extra).unwrap(), 100);
    assert_eq!(finite_sets(&mesh), before);
    assert_eq!(mesh.number_of_edges(), edges);
    assert_delaunay(&mesh);
}

#[test]
fn removing_a_degree_four_node_leaves_no_reference() {
    init_tracing();
    let (mut mesh, _) = build(&CORNER);
    let e = mesh.insert_node([0.2, 0.2, 0.2], 4).unwrap();
    mesh.remove_node(e).unwrap();
    assert!(mesh.node(e).is_none());
    assert_eq!(finite_sets(&mesh), vec![vec![0, 1, 2, 3]]);
    assert!(mesh.tetrahedra().all(|(_, t)| !t.is_adjacent_to(Some(e))));
    assert!(mesh.triangles().all(|(_, t)| !t.is_adjacent_to_node(Some(e))));
    assert!(mesh.edges().all(|(_, edge)| !edge.is_incident_to(e)));
    assert_eq!(mesh.neighbors(e), Err(TriangulationError::NodeNotFound { node: e }));
}

#[test]
fn removing_hull_nodes_keeps_the_hull_convex() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    for &node in &keys[..3] {
        mesh.remove_node(node).unwrap();
        assert_delaunay(&mesh);
    }
    assert_eq!(mesh.number_of_nodes(), CLOUD.len() - 3);
}

#[test]
fn removing_down_to_three_nodes_and_rebuilding() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD[..6]);
    for &node in &keys[3..] {
        mesh.remove_node(node).unwrap();
    }
    assert_eq!(mesh.number_of_nodes(), 3);
    assert_eq!(mesh.number_of_tetrahedra(), 0);
    assert_eq!(mesh.number_of_edges(), 3);
    mesh.insert_node([0.3, 0.3, 0.9], 50).unwrap();
    mesh.insert_node([0.3, 0.3, -0.9], 51).unwrap();
    assert_delaunay(&mesh);
}

#[test]
fn lowered_organizer_limit_stalls_removal() {
    init_tracing();
    let config = TriangulationConfig {
        organizer_step_limit: 0,
        ..config_presets::strict_limits()
    };
    let mut mesh: Triangulation<usize> = Triangulation::with_config(config);
    for (i, &p) in CORNER.iter().enumerate() {
        mesh.insert_node(p, i).unwrap();
    }
    let interior = mesh.insert_node([0.2, 0.2, 0.2], 4).unwrap();
    assert!(matches!(
        mesh.remove_node(interior),
        Err(TriangulationError::RetriangulationStalled { .. })
    ));
}

#[test]
fn lowered_walk_limit_reports_a_cycle() {
    init_tracing();
    let config = TriangulationConfig {
        walk_step_limit: 0,
        ..config_presets::strict_limits()
    };
    let mut mesh: Triangulation<usize> = Triangulation::with_config(config);
    for (i, &p) in CORNER.iter().enumerate() {
        mesh.insert_node(p, i).unwrap();
    }
    let before = finite_sets(&mesh);
    assert!(matches!(
        mesh.insert_node([0.2, 0.2, 0.2], 4),
        Err(TriangulationError::CycleDetected { .. })
    ));
    assert_eq!(mesh.number_of_nodes(), 4);
    assert_eq!(finite_sets(&mesh), before);
    validate_topology(&mesh).unwrap();
}

// =============================================================================
// MOVEMENT
// =============================================================================

#[test]
fn move_round_trip_restores_the_triangulation() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    let before = finite_sets(&mesh);
    let original = mesh.position(keys[12]).unwrap();
    for target in [[0.5, 0.5, 0.5], [1.5, 0.2, 0.2], [0.58, 0.70, 0.53]] {
        mesh.move_to(keys[12], target).unwrap();
        assert_delaunay(&mesh);
    }
    mesh.move_to(keys[12], original).unwrap();
    assert_delaunay(&mesh);
    assert_eq!(finite_sets(&mesh), before);
    let query = Vector3::new(0.3, 0.3, 0.3);
    assert!(
        mesh.vertices_of_tetrahedron_containing(keys[5], query)
            .unwrap()
            .is_some()
    );
}

#[test]
fn many_small_moves_stay_delaunay() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    for step in 0..20 {
        let node = keys[4 + step % 10];
        let sign = if step % 2 == 0 { 1.0 } else { -1.0 };
        mesh.move_from(node, [0.013 * sign, -0.007 * sign, 0.011]).unwrap();
        assert_delaunay(&mesh);
    }
    for (edge, _) in mesh.edges() {
        assert!(mesh.edge_cross_section(edge).unwrap() >= -1e-9);
    }
}

#[test]
fn move_onto_a_neighbour_is_refused() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    let before = finite_sets(&mesh);
    let neighbour = mesh.neighbor_nodes(keys[8]).unwrap()[0];
    let occupied = mesh.position(neighbour).unwrap();
    assert!(matches!(
        mesh.move_to(keys[8], occupied),
        Err(TriangulationError::PositionNotAllowed { .. })
    ));
    assert_eq!(mesh.position(keys[8]).unwrap(), Vector3::from(CLOUD[8]));
    assert_eq!(finite_sets(&mesh), before);
}

#[test]
fn octahedron_vertex_moves_through_cospherical_states() {
    init_tracing();
    let octahedron = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [-1.0, 0.0, 0.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, -1.0],
    ];
    let (mut mesh, keys) = build(&octahedron);
    assert_delaunay(&mesh);
    for target in [[0.0, 0.0, 1.3], [0.2, 0.1, 1.0], [0.0, 0.0, 0.9], [0.0, 0.0, 1.0]] {
        mesh.move_to(keys[2], target).unwrap();
        assert_delaunay(&mesh);
    }
    let total: f64 = keys.iter().map(|&n| mesh.volume(n).unwrap()).sum();
    assert_relative_eq!(total, 4.0 / 3.0, epsilon = 1e-9);
}

/// Half-step moves of integer lattice points inside a large seed tetrahedron.
/// Every state is full of coplanar and cospherical node sets.
#[test]
fn lattice_moves_keep_the_mesh_delaunay() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(2330);
    let mut points = vec![
        [-20.0, -20.0, -20.0],
        [60.0, -20.0, -20.0],
        [-20.0, 60.0, -20.0],
        [-20.0, -20.0, 60.0],
    ];
    while points.len() < 64 {
        let p: [f64; 3] = std::array::from_fn(|_| f64::from(rng.random_range(0..=5_i32)));
        if !points.contains(&p) {
            points.push(p);
        }
    }
    let (mut mesh, keys) = build(&points);
    assert_delaunay(&mesh);

    for step in 0..400 {
        let node = keys[rng.random_range(4..keys.len())];
        let current = mesh.position(node).unwrap();
        let target: [f64; 3] = std::array::from_fn(|axis| {
            let offset = [-0.5, 0.0, 0.5][rng.random_range(0..3)];
            (current[axis] + offset).clamp(0.0, 5.0)
        });
        match mesh.move_to(node, target) {
            Ok(()) | Err(TriangulationError::PositionNotAllowed { .. }) => {}
            Err(e) => panic!("step {step}: moving {node:?} to {target:?} failed: {e}"),
        }
        validate_topology(&mesh).unwrap_or_else(|e| panic!("step {step}: {e}"));
        let violations = find_delaunay_violations(&mesh).unwrap();
        assert!(violations.is_empty(), "step {step}: {violations:?}");
    }
    assert_eq!(mesh.number_of_nodes(), points.len());
}

// =============================================================================
// FLIPS
// =============================================================================

#[test]
fn flip2to3_then_flip3to2_restores_vertex_sets() {
    init_tracing();
    let points = [
        [0.0, 0.0, 0.0],
        [2.0, 0.0, 0.0],
        [1.0, 2.0, 0.0],
        [1.0, 0.7, 1.5],
        [1.0, 0.7, -1.5],
    ];
    let (mut mesh, _) = build(&points);
    let before = finite_sets(&mesh);
    assert_eq!(before, vec![vec![0, 1, 2, 3], vec![0, 1, 2, 4]]);

    let finite: Vec<TetrahedronKey> = mesh
        .tetrahedra()
        .filter(|(_, t)| !t.is_infinite())
        .map(|(k, _)| k)
        .collect();
    let three = mesh.flip2to3(finite[0], finite[1]).unwrap().unwrap();
    let sets = finite_sets(&mesh);
    assert_eq!(sets.len(), 3);
    assert!(sets.iter().all(|s| s.contains(&3) && s.contains(&4)));
    validate_topology(&mesh).unwrap();

    mesh.flip3to2(three[0], three[1], three[2]).unwrap();
    assert_eq!(finite_sets(&mesh), before);
    assert_delaunay(&mesh);
}

// =============================================================================
// LISTENERS
// =============================================================================

#[derive(Default)]
struct EventLog {
    added: AtomicUsize,
    moved: AtomicUsize,
    removed: AtomicUsize,
}

impl NodeMovementListener<usize> for EventLog {
    fn node_added(&self, _node: &SpaceNode<usize>) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn node_moved(&self, _node: &SpaceNode<usize>) {
        self.moved.fetch_add(1, Ordering::SeqCst);
    }

    fn node_removed(&self, _node: &SpaceNode<usize>) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listeners_are_inherited_and_notified() {
    init_tracing();
    let (mut mesh, keys) = build(&CLOUD);
    let log = Arc::new(EventLog::default());
    mesh.add_listener(keys[5], log.clone()).unwrap();

    let child = mesh.insert_node_near(keys[5], [0.35, 0.3, 0.25], 77).unwrap();
    assert_eq!(mesh.listeners(child).unwrap().len(), 1);
    assert_eq!(log.added.load(Ordering::SeqCst), 1);

    // a local move reports `node_moved`, a reinsertion reports removal and
    // addition instead
    mesh.move_from(child, [0.002, 0.0, 0.0]).unwrap();
    let moved = log.moved.load(Ordering::SeqCst);
    let removed = log.removed.load(Ordering::SeqCst);
    assert_eq!(moved + removed, 1);
    assert_eq!(log.added.load(Ordering::SeqCst), 1 + removed);

    mesh.remove_node(child).unwrap();
    assert_eq!(log.removed.load(Ordering::SeqCst), removed + 1);
    assert_delaunay(&mesh);
}
