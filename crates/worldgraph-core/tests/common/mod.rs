//! Shared fixtures for integration tests.
//!
//! The fixture network straddles the boundary between two 1° cells:
//! `cell-140-184` (west, longitude 4..5) and `cell-140-185` (east, 5..6).

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::Path;

use worldgraph_core::raw::{RawNetwork, RawNode, RawRestriction, RawWay, Tags};
use worldgraph_core::{
    GridCellCoordinate, GridMode, GridOptions, Location, Rectangle, Repository, WorldGrid,
};

pub const WEST: GridCellCoordinate = GridCellCoordinate {
    latitude_index: 140,
    longitude_index: 184,
};
pub const EAST: GridCellCoordinate = GridCellCoordinate {
    latitude_index: 140,
    longitude_index: 185,
};

/// Restriction whose via node (3) lies in the east cell
pub const RESTRICTION_VIA_EAST: i64 = 500;
/// Restriction whose via node (2) lies in the west cell
pub const RESTRICTION_VIA_WEST: i64 = 501;

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn node(id: i64, lat: f64, lon: f64) -> RawNode {
    RawNode {
        id,
        lat,
        lon,
        tags: Tags::new(),
    }
}

fn place(id: i64, lat: f64, lon: f64, kind: &str, name: &str, population: &str) -> RawNode {
    RawNode {
        id,
        lat,
        lon,
        tags: tags(&[("place", kind), ("name", name), ("population", population)]),
    }
}

fn way(id: i64, nodes: &[i64], extra: &[(&str, &str)]) -> RawWay {
    let mut way_tags = tags(&[("highway", "primary")]);
    way_tags.extend(tags(extra));
    RawWay {
        id,
        nodes: nodes.to_vec(),
        tags: way_tags,
    }
}

/// Five roads over two cells, three places and two turn restrictions
pub fn two_cell_network() -> RawNetwork {
    RawNetwork {
        nodes: vec![
            node(1, 50.5, 4.5),
            node(2, 50.5, 4.9),
            node(3, 50.5, 5.1),
            node(4, 50.5, 5.5),
            node(5, 50.7, 5.1),
            place(10, 50.56, 4.69, "town", "Gembloux", "26000"),
            place(11, 50.62, 5.58, "village", "Walhain", "7000"),
            place(12, 50.47, 4.87, "city", "Namur", "110000"),
        ],
        ways: vec![
            way(100, &[1, 2], &[("name", "Chaussée de Namur"), ("tmc:table", "17")]),
            way(101, &[2, 3], &[("name", "Route de la Frontière")]),
            way(102, &[3, 4], &[("oneway", "yes")]),
            way(103, &[3, 5], &[]),
            way(104, &[4, 5], &[("tmc:table", "17")]),
        ],
        restrictions: vec![
            RawRestriction {
                id: RESTRICTION_VIA_EAST,
                restriction: "no_left_turn".to_string(),
                from_way: 101,
                via_node: Some(3),
                to_way: 103,
            },
            RawRestriction {
                id: RESTRICTION_VIA_WEST,
                restriction: "only_straight_on".to_string(),
                from_way: 100,
                via_node: Some(2),
                to_way: 101,
            },
        ],
    }
}

/// Options covering both fixture cells and their ring of neighbours
pub fn fixture_options() -> GridOptions {
    GridOptions::default().with_region(Rectangle::from_corners(
        Location::new(49.5, 3.5),
        Location::new(51.5, 6.5),
    ))
}

pub fn repository(folder: &Path) -> Repository {
    Repository::new("fixture", folder.join("world"))
}

/// Extract the fixture network into a fresh repository under `folder`
pub fn extracted_repository(folder: &Path) -> Repository {
    extracted_repository_with(folder, &two_cell_network())
}

/// Extract `network` into a fresh repository under `folder`
pub fn extracted_repository_with(folder: &Path, network: &RawNetwork) -> Repository {
    let repository = repository(folder);
    let grid = WorldGrid::open(repository.clone(), GridMode::Create, fixture_options())
        .expect("create grid");
    grid.extract(&repository, network)
        .expect("extract")
        .into_result()
        .expect("complete extraction");
    repository
}

/// Open an extracted repository for reading
pub fn read_grid(repository: &Repository) -> WorldGrid {
    WorldGrid::open(repository.clone(), GridMode::Read, fixture_options()).expect("read grid")
}
