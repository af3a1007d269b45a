//! Integration tests for the world grid lifecycle
//!
//! Tests cover:
//! - Extraction in CREATE mode followed by reading in READ mode
//! - Opening modes and their failure cases
//! - Cell lookup by name, location and identifier
//! - Partial extraction failures
//! - Index version rebuild in WRITE mode

mod common;

use std::path::Path;
use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use worldgraph_core::extract::RegionFor;
use worldgraph_core::store::{Archive, ArchiveMode};
use worldgraph_core::{
    CutFile, DataKind, ExtractError, GridCellCoordinate, GridMode, JsonRegionCutter, Location,
    RawNetwork, Rectangle, RegionCutter, WorldGraphError, WorldGrid,
};

// ============================================================================
// Create → Read round trip
// ============================================================================

#[test]
fn test_extract_then_read() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());

    assert!(repository.graph_path(WEST).exists());
    assert!(repository.graph_path(EAST).exists());
    assert!(repository.index_path().exists());
    assert!(repository.inclusion_cache_path().exists());

    let grid = read_grid(&repository);
    assert_eq!(grid.mode(), GridMode::Read);

    let west = grid.world_cell(WEST).unwrap();
    assert!(!west.is_loaded());
    assert!(west.has_graph(&repository));

    let graph = west.cell_graph().unwrap();
    assert_eq!(graph.vertex_count(), 3);
    assert_eq!(graph.edge_count(), 4);
    assert_eq!(graph.place_count(), 2);
    assert!(west.is_loaded());
    assert_eq!(west.load_count(), 1);

    let east = grid.world_cell(EAST).unwrap().cell_graph().unwrap();
    assert_eq!(east.vertex_count(), 4);
    // 101 and 103 both ways, 102 one-way, 104 both ways
    assert_eq!(east.edge_count(), 7);
}

#[test]
fn test_raw_extracts_removed_unless_kept() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let scan = repository.scan();
    assert_eq!(scan.count(DataKind::Pbf), 0);
    assert_eq!(scan.count(DataKind::Graph), 2);

    let kept = common::repository(&temp.path().join("kept"));
    let grid = WorldGrid::open(
        kept.clone(),
        GridMode::Create,
        fixture_options().with_keep_raw(true),
    )
    .unwrap();
    grid.extract(&kept, &two_cell_network()).unwrap();
    assert_eq!(kept.scan().count(DataKind::Pbf), 2);
    assert!(grid.world_cell(WEST).unwrap().has_pbf(&kept));
}

#[test]
fn test_stats_after_extraction() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    grid.world_cell(WEST).unwrap().cell_graph().unwrap();
    let stats = grid.stats();

    assert_eq!(stats.mode, GridMode::Read);
    assert_eq!(stats.included_cells, 12);
    assert_eq!(stats.graph_files, 2);
    assert_eq!(stats.loaded_cells, 1);
    assert_eq!(stats.tracker.misses, 1);
    assert!(stats.strong_bytes > 0);
}

// ============================================================================
// Opening modes
// ============================================================================

#[test]
fn test_read_missing_repository() {
    let temp = TempDir::new().unwrap();
    let repository = common::repository(temp.path());

    let result = WorldGrid::open(repository, GridMode::Read, fixture_options());
    assert!(matches!(result, Err(WorldGraphError::RepositoryMissing(_))));
}

#[test]
fn test_read_mode_cannot_extract() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let result = grid.extract(&repository, &two_cell_network());
    assert!(matches!(result, Err(WorldGraphError::ReadOnly)));
    assert!(matches!(grid.save_index(), Err(WorldGraphError::ReadOnly)));
}

#[test]
fn test_write_mode_rebuilds_index_of_other_version() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    {
        let archive = Archive::open(&repository.index_path(), ArchiveMode::Read).unwrap();
        archive.set_metadata("index_version", "0.9").unwrap();
    }

    let read = WorldGrid::open(repository.clone(), GridMode::Read, fixture_options());
    assert!(matches!(
        read,
        Err(WorldGraphError::IndexVersionMismatch { .. })
    ));

    let grid = WorldGrid::open(repository.clone(), GridMode::Write, fixture_options()).unwrap();
    assert_eq!(grid.index().way_count().unwrap(), 0);
    grid.extract(&repository, &two_cell_network()).unwrap();

    let reread = read_grid(&repository);
    assert_eq!(reread.index().way_count().unwrap(), 5);
}

// ============================================================================
// Cell lookup
// ============================================================================

#[test]
fn test_cell_lookup() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let by_name = grid.world_cell_named("cell-140-184").unwrap();
    let by_location = grid.world_cell_at(Location::new(50.5, 4.5)).unwrap();
    let by_identifier = grid.world_cell_for_identifier(by_name.identifier()).unwrap();

    assert!(Arc::ptr_eq(&by_name, &by_location));
    assert!(Arc::ptr_eq(&by_name, &by_identifier));
    assert_eq!(by_name.coordinate(), WEST);
    assert_eq!(by_name.identifier(), 140 * 360 + 184);

    assert!(grid.world_cell_named("cell-999999-999999").is_none());
    assert!(grid.world_cell_named("cell-140").is_none());
    assert!(grid.world_cell_named("tile-140-184").is_none());
    // Inside the grid but outside the configured regions
    assert!(grid.world_cell_named("cell-10-10").is_none());
}

#[test]
fn test_cells_in_filters_by_presence() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let with_graph = grid.cells_in(&repository, DataKind::Graph, &Rectangle::WORLD);
    let names: Vec<String> = with_graph.iter().map(|cell| cell.name()).collect();
    assert_eq!(names, vec!["cell-140-184", "cell-140-185"]);

    let biggest = with_graph.biggest(&repository).unwrap();
    let smallest = with_graph.smallest(&repository).unwrap();
    let size = |coordinate: GridCellCoordinate| {
        grid.world_cell(coordinate)
            .and_then(|cell| cell.disk_size(&repository, DataKind::Graph))
    };
    assert!(size(biggest.coordinate()) >= size(smallest.coordinate()));
    assert_eq!(
        with_graph.total_file_size(&repository),
        size(WEST).unwrap() + size(EAST).unwrap()
    );
}

#[test]
fn test_neighbors_only_include_included_cells() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let west = grid.world_cell(WEST).unwrap();
    let neighbors = west.neighbors();
    assert_eq!(neighbors.len(), 8);
    assert!(!neighbors.contains(&west));

    let corner = grid
        .world_cell(GridCellCoordinate::new(139, 183))
        .unwrap();
    assert_eq!(corner.neighbors().len(), 3);

    let around = west.neighbors_and_this();
    assert_eq!(around.len(), 9);
    assert!(Arc::ptr_eq(&around.cells()[0], &west));
}

#[test]
fn test_unload_then_reload() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let cell = grid.world_cell(EAST).unwrap();
    let before = cell.cell_graph().unwrap().edge_count();
    grid.unload_all();
    assert!(!cell.is_loaded());
    assert!(grid.loaded_cells().is_empty());

    assert_eq!(cell.cell_graph().unwrap().edge_count(), before);
    assert_eq!(cell.load_count(), 2);
}

#[test]
fn test_missing_graph_is_load_unavailable() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    let grid = read_grid(&repository);

    let empty = grid.world_cell(GridCellCoordinate::new(139, 183)).unwrap();
    let result = empty.cell_graph();
    assert!(matches!(
        result,
        Err(WorldGraphError::LoadUnavailable { ref cell, .. }) if cell == "cell-139-183"
    ));
    assert!(!empty.is_loaded());
}

// ============================================================================
// Partial failure
// ============================================================================

/// Cuts like the JSON cutter but cannot read back one cell
struct FailingCutter {
    inner: JsonRegionCutter,
    broken: GridCellCoordinate,
}

impl RegionCutter for FailingCutter {
    fn extension(&self) -> &str {
        self.inner.extension()
    }

    fn cut(
        &self,
        network: &RawNetwork,
        region_for: &RegionFor<'_>,
        output_folder: &Path,
    ) -> Result<Vec<CutFile>, ExtractError> {
        self.inner.cut(network, region_for, output_folder)
    }

    fn read_cell(&self, path: &Path) -> Result<RawNetwork, ExtractError> {
        let broken = format!("{}.", self.broken.name());
        let is_broken = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(&broken))
            .unwrap_or(false);
        if is_broken {
            return Err(ExtractError::Invalid {
                cell: self.broken.name(),
                reason: "truncated extract".to_string(),
            });
        }
        self.inner.read_cell(path)
    }
}

#[test]
fn test_partial_extraction_failure() {
    let temp = TempDir::new().unwrap();
    let repository = common::repository(temp.path());
    let grid = WorldGrid::with_cutter(
        repository.clone(),
        GridMode::Create,
        fixture_options(),
        Box::new(FailingCutter {
            inner: JsonRegionCutter::new(),
            broken: EAST,
        }),
    )
    .unwrap();

    let outcome = grid.extract(&repository, &two_cell_network()).unwrap();
    assert_eq!(outcome.expected, 2);
    assert_eq!(outcome.produced, 1);
    assert_eq!(outcome.failed, vec![EAST]);
    assert!(!outcome.is_complete());

    // The good cell is kept and indexed
    assert!(repository.graph_path(WEST).exists());
    assert!(!repository.graph_path(EAST).exists());
    assert_eq!(
        grid.cell_for_way_identifier(100).unwrap().unwrap().coordinate(),
        WEST
    );

    assert!(matches!(
        outcome.into_result(),
        Err(WorldGraphError::ExtractionPartialFailure {
            produced: 1,
            expected: 2
        })
    ));
}

#[test]
fn test_unreadable_index_field_fails_cells_not_the_run() {
    let temp = TempDir::new().unwrap();
    let repository = extracted_repository(temp.path());
    {
        let archive = Archive::open(&repository.index_path(), ArchiveMode::Read).unwrap();
        archive.save_field("way_cells", "not a map").unwrap();
    }

    let grid = WorldGrid::open(repository.clone(), GridMode::Write, fixture_options()).unwrap();
    let result = grid.extract(&repository, &two_cell_network());

    // Every cell fails to index, and saving the index reports the bad field
    assert!(matches!(result, Err(WorldGraphError::Store(_))));

    // The run still finished: graphs are rewritten and raw extracts removed
    let scan = repository.scan();
    assert_eq!(scan.count(DataKind::Graph), 2);
    assert_eq!(scan.count(DataKind::Pbf), 0);
    assert_eq!(grid.stats().raw_files, 0);
}
