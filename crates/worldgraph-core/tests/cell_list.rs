//! Integration tests for sequences over several cells
//!
//! Boundary ways and their vertices are copied into every cell they touch;
//! turn restrictions are reported once, by the cell holding the via node.

mod common;

use std::collections::BTreeSet;

use common::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use worldgraph_core::raw::RawRestriction;
use worldgraph_core::{Distance, Location, WorldCellList};

fn both_cells(grid: &worldgraph_core::WorldGrid) -> WorldCellList {
    [WEST, EAST]
        .into_iter()
        .filter_map(|coordinate| grid.world_cell(coordinate))
        .collect()
}

#[test]
fn test_relations_are_deduplicated_by_via_cell() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    // Both restrictions touch way 101, so each cell stores both
    for cell in &cells {
        assert_eq!(cell.cell_graph().unwrap().relation_count(), 2);
    }

    let relations: Vec<_> = cells.relations().collect();
    assert_eq!(relations.len(), 2);
    assert_eq!(cells.relation_count(), 2);

    let owner = |id: i64| {
        relations
            .iter()
            .find(|relation| relation.id() == id)
            .map(|relation| relation.cell().coordinate())
    };
    assert_eq!(owner(RESTRICTION_VIA_EAST), Some(EAST));
    assert_eq!(owner(RESTRICTION_VIA_WEST), Some(WEST));
}

#[test]
fn test_relation_endpoints_resolve_in_owning_cell() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let relation = both_cells(&grid)
        .relations()
        .find(|relation| relation.id() == RESTRICTION_VIA_EAST)
        .unwrap();

    assert_eq!(relation.via(), Some(Location::new(50.5, 5.1)));
    let from_ways: BTreeSet<i64> = relation.from().iter().map(|edge| edge.way_id()).collect();
    let to_ways: BTreeSet<i64> = relation.to().iter().map(|edge| edge.way_id()).collect();
    assert_eq!(from_ways, BTreeSet::from([101]));
    assert_eq!(to_ways, BTreeSet::from([103]));
}

#[test]
fn test_edges_and_vertices_span_cells() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    // The boundary way 101 appears in both cells
    assert_eq!(cells.edge_count(), 4 + 7);
    assert_eq!(cells.edges().filter(|edge| edge.way_id() == 101).count(), 4);

    // Vertices 2 and 3 are shared; each is owned by one cell only
    assert_eq!(cells.vertex_count(), 3 + 4);
    let owned: Vec<i64> = {
        let mut ids: Vec<i64> = cells.owned_vertices().map(|vertex| vertex.id()).collect();
        ids.sort();
        ids
    };
    assert_eq!(owned, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_edge_navigation() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    let oneway: Vec<_> = cells.edges().filter(|edge| edge.way_id() == 102).collect();
    assert_eq!(oneway.len(), 1);
    let edge = &oneway[0];
    assert_eq!(edge.from().id(), 3);
    assert_eq!(edge.to().id(), 4);
    assert!(edge.edge().length_meters > 0.0);

    let named = cells
        .edges()
        .find(|edge| edge.way_id() == 100)
        .unwrap();
    assert_eq!(
        named.edge().road_name.as_deref(),
        Some("Chaussée de Namur")
    );
    assert_eq!(named.edge().tmc_table, Some(17));

    let vertex_three = edge.from();
    let outgoing: BTreeSet<i64> = vertex_three
        .out_edges()
        .iter()
        .map(|edge| edge.way_id())
        .collect();
    assert_eq!(outgoing, BTreeSet::from([101, 102, 103]));
}

#[test]
fn test_nearest_vertex_across_cells() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    let (vertex, distance) = cells
        .nearest_vertex(Location::new(50.5001, 5.0999), Distance::kilometers(5.0))
        .unwrap();
    assert_eq!(vertex.id(), 3);
    assert!(distance.as_meters() < 50.0);

    assert!(cells
        .nearest_vertex(Location::new(51.4, 6.4), Distance::meters(100.0))
        .is_none());
}

#[test]
fn test_within_and_memory_estimate() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    let west_only = cells.within(&worldgraph_core::Rectangle::from_corners(
        Location::new(50.1, 4.1),
        Location::new(50.9, 4.9),
    ));
    assert_eq!(west_only.len(), 1);
    assert_eq!(west_only.cells()[0].coordinate(), WEST);

    // Sizes come from the index before any graph is loaded
    assert!(cells.estimated_memory_size() > 0);
    assert!(grid.loaded_cells().is_empty());

    cells.edge_count();
    assert_eq!(grid.loaded_cells().len(), 2);
    cells.unload_all();
    assert!(grid.loaded_cells().is_empty());
}

#[test]
fn test_relation_copy_without_its_via_node_is_not_reported() {
    let temp = TempDir::new().unwrap();
    let mut network = two_cell_network();
    // Node 5 lies in the east cell and is not on way 100, so the west copy
    // of this restriction has no via vertex
    network.restrictions.push(RawRestriction {
        id: 502,
        restriction: "no_right_turn".to_string(),
        from_way: 100,
        via_node: Some(5),
        to_way: 101,
    });
    let repository = extracted_repository_with(temp.path(), &network);
    let grid = read_grid(&repository);
    let cells = both_cells(&grid);

    let west_copy = grid
        .world_cell(WEST)
        .unwrap()
        .cell_graph()
        .unwrap()
        .relations()
        .any(|(_, relation)| relation.id == 502);
    assert!(west_copy);

    let owners: Vec<_> = cells
        .relations()
        .filter(|relation| relation.id() == 502)
        .map(|relation| relation.cell().coordinate())
        .collect();
    assert_eq!(owners, vec![EAST]);
    assert_eq!(cells.relation_count(), 3);
}
