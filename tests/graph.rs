use pointsto::analysis::graph::{ExactCategory, PointsToGraph, ValueCategory};
use pointsto::analysis::solve::{self, PointsToSets};
use pointsto::analysis::structure::ProgramStructure;
use pointsto::ir::{ModuleBuilder, ValueId};

// ------------------------------------------------------------------
// Helpers

/// Distinct value identities to populate graphs with; the graph only ever
/// compares them.
fn values() -> Vec<ValueId> {
    let mut b = ModuleBuilder::new();
    let i32t = b.int_type(32);
    let void = b.void_type();
    let fn_ty = b.function_type(void, vec![], false);
    let f = b.function("f", fn_ty, true);
    (0..8).map(|_| b.alloca(f, i32t)).collect()
}

fn value_graph() -> PointsToGraph {
    PointsToGraph::new(Box::new(ValueCategory))
}

// ------------------------------------------------------------------

#[test]
fn insert_reports_change() {
    let v = values();
    let mut g = value_graph();
    assert!(g.insert((v[0], -1), (v[1], 0)));
    // Same fact again: nothing changes.
    assert!(!g.insert((v[0], -1), (v[1], 0)));
}

#[test]
fn same_category_pointees_share_a_node() {
    let v = values();
    let mut g = value_graph();
    assert!(g.insert((v[0], -1), (v[1], 0)));
    // Same target value at another offset joins the existing successor.
    assert!(g.insert((v[0], -1), (v[1], 4)));
    assert_eq!(g.node_count(), 2);

    let sets = g.to_points_to_sets();
    let s = sets.lookup(&(v[0], -1)).unwrap();
    assert!(s.contains(&(v[1], 0)));
    assert!(s.contains(&(v[1], 4)));
}

#[test]
fn exact_category_separates_offsets() {
    let v = values();
    let mut g = PointsToGraph::new(Box::new(ExactCategory));
    g.insert((v[0], -1), (v[1], 0));
    g.insert((v[0], -1), (v[1], 4));
    assert_eq!(g.node_count(), 3);
}

#[test]
fn edge_to_existing_node() {
    let v = values();
    let mut g = value_graph();
    g.insert((v[0], -1), (v[2], 0));
    // A second pointer to the same location links to the existing node.
    assert!(g.insert((v[1], -1), (v[2], 0)));
    assert_eq!(g.node_count(), 3);

    let sets = g.to_points_to_sets();
    assert!(sets.lookup(&(v[0], -1)).unwrap().contains(&(v[2], 0)));
    assert!(sets.lookup(&(v[1], -1)).unwrap().contains(&(v[2], 0)));
}

#[test]
fn insert_set_ors_per_element_changes() {
    let v = values();
    let mut g = value_graph();
    let mut set = pointsto::PointsToSet::new();
    set.insert((v[1], 0));
    set.insert((v[2], 0));
    assert!(g.insert_set((v[0], -1), &set));
    assert!(!g.insert_set((v[0], -1), &set));
    set.insert((v[3], 0));
    assert!(g.insert_set((v[0], -1), &set));
}

#[test]
fn deref_pointee_copies_outgoing_edges() {
    let v = values();
    let mut g = value_graph();
    // Nothing known about the location: no-op, and in particular no
    // p -> location edge.
    assert!(!g.insert_deref_pointee((v[0], -1), (v[1], 0)));
    assert_eq!(g.node_count(), 0);

    g.insert((v[1], -1), (v[2], 0));
    // p = *loc where loc -> v2: p inherits the edge to v2's node.
    assert!(g.insert_deref_pointee((v[0], -1), (v[1], -1)));
    let sets = g.to_points_to_sets();
    assert!(sets.lookup(&(v[0], -1)).unwrap().contains(&(v[2], 0)));
}

#[test]
fn deref_pointer_extends_successors() {
    let v = values();
    let mut g = value_graph();
    // p has no node yet: no-op.
    assert!(!g.insert_deref_pointer((v[0], -1), (v[1], 0)));

    g.insert((v[0], -1), (v[2], 0));
    // *p = &loc: every successor of p points to loc.
    assert!(g.insert_deref_pointer((v[0], -1), (v[3], 0)));
    let sets = g.to_points_to_sets();
    assert!(sets.lookup(&(v[2], 0)).unwrap().contains(&(v[3], 0)));
}

#[test]
fn chained_nodes_flatten_transitively_one_level() {
    let v = values();
    let mut g = value_graph();
    g.insert((v[0], -1), (v[1], 0));
    g.insert((v[1], 0), (v[2], 0));
    let sets = g.to_points_to_sets();
    // One level per node; flattening is not a transitive closure.
    assert_eq!(
        sets.lookup(&(v[0], -1)).unwrap().iter().copied().collect::<Vec<_>>(),
        vec![(v[1], 0)]
    );
    assert_eq!(
        sets.lookup(&(v[1], 0)).unwrap().iter().copied().collect::<Vec<_>>(),
        vec![(v[2], 0)]
    );
}

// A graph built from a solved map reproduces every recorded fact.
#[test]
fn round_trip_preserves_solved_sets() {
    let mut b = ModuleBuilder::new();
    let i32t = b.int_type(32);
    let i32p = b.pointer_type(i32t);
    let void = b.void_type();
    let main_ty = b.function_type(void, vec![], false);
    let main = b.function("main", main_ty, true);
    let a = b.alloca(main, i32t);
    let c = b.alloca(main, i32t);
    let p = b.alloca(main, i32p);
    let q = b.alloca(main, i32p);
    b.store(main, a, p);
    b.store(main, c, p);
    b.store(main, c, q);
    let tmp = b.load(main, p);
    b.store(main, tmp, q);
    b.ret(main, None);
    let module = b.build();

    let program = ProgramStructure::new(&module);
    let sets = solve::compute_points_to_sets(&module, &program);
    assert!(!sets.is_empty());

    let graph = PointsToGraph::from_points_to_sets(&sets, Box::new(ValueCategory));
    let flattened: PointsToSets = graph.to_points_to_sets();
    for (ptr, pointees) in &sets {
        if pointees.is_empty() {
            continue;
        }
        let got = flattened.lookup(ptr).unwrap();
        assert!(got.is_superset(pointees));
    }
}
