//! Extraction: cutting raw input into per-cell extracts and building cell
//! graphs from them.
//!
//! ```text
//! RawNetwork ──RegionCutter::cut──▶ cell-x-y.osm.json ──CellGraphBuilder──▶ CellGraph
//! ```
//!
//! A way is copied into every cell that holds at least one of its nodes,
//! together with all of its nodes, so each cell graph is complete on its own
//! and overlaps its neighbours along the boundary.

use crate::geography::Location;
use crate::graph::{CellGraph, Edge, Place, Relation, RestrictionKind, Vertex};
use crate::grid_cell::GridCellCoordinate;
use crate::raw::{RawDataError, RawNetwork, RawWay};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// File extension written by [`JsonRegionCutter`]
pub const JSON_EXTRACT_EXTENSION: &str = "osm.json";

/// Errors from cutting or building
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Raw(#[from] RawDataError),

    #[error("failed to prepare output folder '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cell {cell} produced an invalid graph: {reason}")]
    Invalid { cell: String, reason: String },
}

/// One per-cell raw extract written by a cutter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutFile {
    pub coordinate: GridCellCoordinate,
    pub path: PathBuf,
}

/// Maps a location to the cell that owns it, `None` outside the grid's
/// inclusion set
pub type RegionFor<'a> = dyn Fn(Location) -> Option<GridCellCoordinate> + Sync + 'a;

/// Splits a raw network into one raw extract per cell
pub trait RegionCutter: Send + Sync {
    /// Extension of the files this cutter writes (without the leading dot)
    fn extension(&self) -> &str;

    /// Write one extract per non-empty cell into `output_folder`
    fn cut(
        &self,
        network: &RawNetwork,
        region_for: &RegionFor<'_>,
        output_folder: &Path,
    ) -> Result<Vec<CutFile>, ExtractError>;

    /// Read back an extract written by [`RegionCutter::cut`]
    fn read_cell(&self, path: &Path) -> Result<RawNetwork, ExtractError>;
}

// ============================================================================
// JSON cutter
// ============================================================================

#[derive(Default)]
struct Bucket {
    nodes: BTreeSet<usize>,
    ways: Vec<usize>,
    way_ids: HashSet<i64>,
}

/// Region cutter writing serde_json extracts named `cell-<lat>-<lon>.osm.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRegionCutter;

impl JsonRegionCutter {
    pub fn new() -> Self {
        Self
    }
}

impl RegionCutter for JsonRegionCutter {
    fn extension(&self) -> &str {
        JSON_EXTRACT_EXTENSION
    }

    fn cut(
        &self,
        network: &RawNetwork,
        region_for: &RegionFor<'_>,
        output_folder: &Path,
    ) -> Result<Vec<CutFile>, ExtractError> {
        std::fs::create_dir_all(output_folder).map_err(|source| ExtractError::Io {
            path: output_folder.to_path_buf(),
            source,
        })?;

        let positions = network.node_positions();
        let mut buckets: BTreeMap<GridCellCoordinate, Bucket> = BTreeMap::new();

        for (way_pos, way) in network.ways.iter().enumerate() {
            let members: Vec<usize> = way
                .nodes
                .iter()
                .filter_map(|id| positions.get(id).copied())
                .collect();
            let cells: BTreeSet<GridCellCoordinate> = members
                .iter()
                .filter_map(|&pos| region_for(network.nodes[pos].location()))
                .collect();
            for cell in cells {
                let bucket = buckets.entry(cell).or_default();
                bucket.ways.push(way_pos);
                bucket.way_ids.insert(way.id);
                bucket.nodes.extend(members.iter().copied());
            }
        }

        // Places are standalone nodes; they belong to their own cell only
        for (pos, node) in network.nodes.iter().enumerate() {
            if !node.tags.contains_key("place") {
                continue;
            }
            if let Some(cell) = region_for(node.location()) {
                buckets.entry(cell).or_default().nodes.insert(pos);
            }
        }

        let mut files = Vec::with_capacity(buckets.len());
        for (coordinate, bucket) in buckets {
            let restrictions = network
                .restrictions
                .iter()
                .filter(|r| bucket.way_ids.contains(&r.from_way) || bucket.way_ids.contains(&r.to_way))
                .cloned()
                .collect();
            let extract = RawNetwork {
                nodes: bucket
                    .nodes
                    .iter()
                    .map(|&pos| network.nodes[pos].clone())
                    .collect(),
                ways: bucket
                    .ways
                    .iter()
                    .map(|&pos| network.ways[pos].clone())
                    .collect(),
                restrictions,
            };

            let path = output_folder.join(format!("{}.{}", coordinate.name(), self.extension()));
            extract.write_json(&path)?;
            trace!(
                "Cut {}: {} nodes, {} ways",
                coordinate,
                extract.nodes.len(),
                extract.ways.len()
            );
            files.push(CutFile { coordinate, path });
        }

        debug!("Cut raw network into {} cell extracts", files.len());
        Ok(files)
    }

    fn read_cell(&self, path: &Path) -> Result<RawNetwork, ExtractError> {
        Ok(RawNetwork::read_json(path)?)
    }
}

// ============================================================================
// Cell graph builder
// ============================================================================

/// Builds a [`CellGraph`] from one cell's raw extract.
///
/// Ways tagged `highway` become edges between consecutive nodes, with a
/// reverse edge unless the way is one-way. Nodes tagged `place` and `name`
/// become places. Restrictions with an unknown kind are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellGraphBuilder;

impl CellGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, network: &RawNetwork) -> CellGraph {
        let mut graph = CellGraph::new();
        let positions = network.node_positions();

        let mut seen_ways = HashSet::new();
        for way in network.ways.iter().filter(|way| way.tags.contains_key("highway")) {
            if !seen_ways.insert(way.id) {
                trace!("Skipping repeated way {}", way.id);
                continue;
            }
            self.add_way(&mut graph, network, &positions, way);
        }

        for restriction in &network.restrictions {
            let Some(kind) = RestrictionKind::parse(&restriction.restriction) else {
                trace!(
                    "Skipping restriction {} with kind '{}'",
                    restriction.id,
                    restriction.restriction
                );
                continue;
            };
            graph.add_relation(Relation {
                id: restriction.id,
                kind,
                from_way: restriction.from_way,
                via_node: restriction.via_node,
                to_way: restriction.to_way,
            });
        }

        for node in &network.nodes {
            let (Some(place_type), Some(name)) = (node.tags.get("place"), node.tags.get("name"))
            else {
                continue;
            };
            graph.add_place(Place {
                name: name.clone(),
                location: node.location(),
                population: node.tags.get("population").and_then(|p| p.parse().ok()),
                place_type: place_type.clone(),
            });
        }

        graph
    }

    fn add_way(
        &self,
        graph: &mut CellGraph,
        network: &RawNetwork,
        positions: &std::collections::HashMap<i64, usize>,
        way: &RawWay,
    ) {
        let oneway = matches!(way.tag("oneway"), Some("yes" | "true" | "1"));
        let road_name = way.tag("name").map(str::to_string);
        let tmc_table = way.tag("tmc:table").and_then(|t| t.parse().ok());

        let nodes: Vec<_> = way
            .nodes
            .iter()
            .filter_map(|id| positions.get(id).map(|&pos| &network.nodes[pos]))
            .collect();

        for (segment, pair) in nodes.windows(2).enumerate() {
            let (from, to) = (pair[0], pair[1]);
            graph.add_vertex(Vertex {
                id: from.id,
                location: from.location(),
            });
            graph.add_vertex(Vertex {
                id: to.id,
                location: to.location(),
            });

            let edge = Edge {
                way_id: way.id,
                segment: segment as u32,
                reverse: false,
                length_meters: from.location().distance_to(&to.location()).as_meters(),
                road_name: road_name.clone(),
                tmc_table,
            };
            if !oneway {
                graph.add_edge(
                    to.id,
                    from.id,
                    Edge {
                        reverse: true,
                        ..edge.clone()
                    },
                );
            }
            graph.add_edge(from.id, to.id, edge);
        }
    }
}
