//! Integration tests for persisting built cell graphs
//!
//! Every edge the builder produces must come back from the cell store,
//! including long ways, neighbouring way ids and way 0.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::TempDir;
use worldgraph_core::raw::{RawNetwork, RawNode, RawWay, Tags};
use worldgraph_core::{CellGraph, CellGraphBuilder, CellStore};

type EdgeKey = (i64, u32, bool, i64, i64);

fn edge_keys(graph: &CellGraph) -> Vec<EdgeKey> {
    let mut keys: Vec<EdgeKey> = graph
        .edges()
        .filter_map(|(idx, edge)| {
            let (from, to) = graph.edge_endpoints(idx)?;
            Some((
                edge.way_id,
                edge.segment,
                edge.reverse,
                graph.vertex(from)?.id,
                graph.vertex(to)?.id,
            ))
        })
        .collect();
    keys.sort();
    keys
}

/// Ways given as `(way id, node count, oneway)`, each over its own nodes
fn network(ways: &[(i64, usize, bool)]) -> RawNetwork {
    let mut network = RawNetwork::default();
    let mut next_node = 1;
    for &(id, length, oneway) in ways {
        let nodes: Vec<i64> = (next_node..next_node + length as i64).collect();
        for &node in &nodes {
            network.nodes.push(RawNode {
                id: node,
                lat: 50.0 + node as f64 * 1e-5,
                lon: 4.0 + (id as f64) * 1e-3,
                tags: Tags::new(),
            });
        }
        next_node += length as i64;

        let mut tags: Tags = [("highway".to_string(), "residential".to_string())].into();
        if oneway {
            tags.insert("oneway".to_string(), "yes".to_string());
        }
        network.ways.push(RawWay { id, nodes, tags });
    }
    network
}

fn save_and_reload(graph: &CellGraph) -> CellGraph {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cell-140-184.graph");
    CellStore::save_graph(&path, "cell-140-184", graph).unwrap();
    CellStore::load_graph(&path).unwrap()
}

#[test]
fn test_long_way_next_to_adjacent_ids_and_way_zero() {
    // 1001 segments on way 5 reach past any per-way numbering into way 6
    let graph = CellGraphBuilder::new().build(&network(&[
        (5, 1002, true),
        (6, 2, true),
        (0, 2, false),
    ]));
    assert_eq!(graph.edge_count(), 1001 + 1 + 2);

    let reloaded = save_and_reload(&graph);
    assert_eq!(reloaded.edge_count(), graph.edge_count());
    assert_eq!(reloaded.vertex_count(), graph.vertex_count());
    assert_eq!(edge_keys(&reloaded), edge_keys(&graph));

    let way_zero: Vec<bool> = reloaded
        .edges()
        .filter(|(_, edge)| edge.way_id == 0)
        .map(|(_, edge)| edge.reverse)
        .collect();
    assert_eq!(way_zero.len(), 2);
    assert!(way_zero.contains(&true) && way_zero.contains(&false));
}

#[test]
fn test_repeated_way_is_built_once() {
    let mut raw = network(&[(7, 3, false)]);
    raw.ways.push(raw.ways[0].clone());

    let graph = CellGraphBuilder::new().build(&raw);
    assert_eq!(graph.edge_count(), 4);
    assert_eq!(edge_keys(&save_and_reload(&graph)), edge_keys(&graph));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Consecutive way ids of any length survive a store round trip.
    #[test]
    fn built_edges_survive_the_store(
        first_way in -1i64..2,
        shapes in prop::collection::vec((2usize..1300, any::<bool>()), 1..4),
    ) {
        let ways: Vec<(i64, usize, bool)> = shapes
            .iter()
            .enumerate()
            .map(|(i, &(length, oneway))| (first_way + i as i64, length, oneway))
            .collect();
        let graph = CellGraphBuilder::new().build(&network(&ways));

        let expected: usize = ways
            .iter()
            .map(|&(_, length, oneway)| (length - 1) * if oneway { 1 } else { 2 })
            .sum();
        prop_assert_eq!(graph.edge_count(), expected);

        let reloaded = save_and_reload(&graph);
        prop_assert_eq!(reloaded.edge_count(), expected);
        prop_assert_eq!(edge_keys(&reloaded), edge_keys(&graph));
    }
}
