//! World Grid
//!
//! Top-level entry point. Owns the grid geometry, the inclusion set, the
//! cell map, the reference tracker and the World Graph Index, and mediates
//! extraction of new cells from raw input.
//!
//! ## Modes
//!
//! - `Read`: the repository folder and its index must exist
//! - `Write`: an existing index is extended, otherwise a fresh one is started
//! - `Create`: always starts from a fresh index

use super::cell::WorldCell;
use super::cell_list::WorldCellList;
use super::error::{Result, WorldGraphError};
use super::inclusion::InclusionSet;
use super::index::{IndexField, IndexedPlace, WorldGraphIndex};
use super::repository::{DataKind, Repository, RepositoryScan};
use crate::extract::{CellGraphBuilder, CutFile, JsonRegionCutter, RegionCutter};
use crate::geography::{Location, Rectangle};
use crate::graph::CellGraph;
use crate::grid_cell::{Grid, GridCellCoordinate};
use crate::raw::RawDataSource;
use crate::reference::{Demotion, ReferenceTracker, TrackerConfig, TrackerMetrics};
use crate::store::CellStore;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use worldgraph_config::{DemotionMode, WorldGraphConfig};

/// How a grid treats its repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridMode {
    Read,
    Write,
    Create,
}

impl GridMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
        }
    }
}

impl std::fmt::Display for GridMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "create" => Ok(Self::Create),
            other => Err(format!("unknown grid mode '{}'", other)),
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Settings a grid is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct GridOptions {
    pub cell_size_degrees: f64,
    /// Regions whose cells are included; empty means the whole world
    pub regions: Vec<Rectangle>,
    pub tracker: TrackerConfig,
    /// Extraction threads, 0 for the rayon default
    pub parallelism: usize,
    /// Keep per-cell raw extracts after building graphs
    pub keep_raw: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            cell_size_degrees: worldgraph_config::DEFAULT_CELL_SIZE_DEGREES,
            regions: Vec::new(),
            tracker: TrackerConfig::default(),
            parallelism: 0,
            keep_raw: false,
        }
    }
}

impl GridOptions {
    pub fn with_cell_size(mut self, degrees: f64) -> Self {
        self.cell_size_degrees = degrees;
        self
    }

    pub fn with_region(mut self, region: Rectangle) -> Self {
        self.regions.push(region);
        self
    }

    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_keep_raw(mut self, keep_raw: bool) -> Self {
        self.keep_raw = keep_raw;
        self
    }
}

impl From<DemotionMode> for Demotion {
    fn from(mode: DemotionMode) -> Self {
        match mode {
            DemotionMode::Soft => Demotion::Soft,
            DemotionMode::Weak => Demotion::Weak,
        }
    }
}

impl From<&WorldGraphConfig> for GridOptions {
    fn from(config: &WorldGraphConfig) -> Self {
        let regions = config
            .grid
            .regions
            .iter()
            .map(|region| {
                Rectangle::from_corners(
                    Location::new(region.min_latitude, region.min_longitude),
                    Location::new(region.max_latitude, region.max_longitude),
                )
            })
            .collect();
        let tracker = TrackerConfig {
            budget_bytes: config.cache.memory_budget_bytes(),
            demotion: config.cache.demotion.into(),
            soft_budget_bytes: config.cache.soft_budget_bytes(),
            unknown_size_bytes: config.cache.unknown_cell_size_bytes(),
        };
        Self {
            cell_size_degrees: config.grid.cell_size_degrees,
            regions,
            tracker,
            parallelism: config.extraction.parallelism,
            keep_raw: config.extraction.keep_raw,
        }
    }
}

// ============================================================================
// Extraction outcome and stats
// ============================================================================

/// Result of one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    /// Cells with a raw extract
    pub expected: usize,
    /// Cells whose graph was written and indexed
    pub produced: usize,
    /// Cells that failed; their previous files, if any, are untouched
    pub failed: Vec<GridCellCoordinate>,
}

impl ExtractionOutcome {
    pub fn is_complete(&self) -> bool {
        self.produced == self.expected
    }

    /// `ExtractionPartialFailure` unless every expected cell was produced
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(WorldGraphError::ExtractionPartialFailure {
                produced: self.produced,
                expected: self.expected,
            })
        }
    }
}

/// Snapshot of a grid's state
#[derive(Debug, Clone, Serialize)]
pub struct WorldGridStats {
    pub mode: GridMode,
    pub repository: PathBuf,
    pub cell_size_degrees: f64,
    /// Cells in the inclusion set
    pub included_cells: u64,
    /// Cells materialised so far
    pub created_cells: usize,
    /// Cells whose graph is resident
    pub loaded_cells: usize,
    pub graph_files: usize,
    pub graph_bytes: u64,
    pub raw_files: usize,
    /// Estimated bytes of strongly retained graphs
    pub strong_bytes: usize,
    pub budget_bytes: usize,
    pub tracker: TrackerMetrics,
    pub cache_hit_rate: f64,
    pub loaded_index_fields: Vec<IndexField>,
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the grid handle and its cells
pub(crate) struct GridShared {
    mode: GridMode,
    geometry: Grid,
    repository: Repository,
    inclusion: InclusionSet,
    tracker: Arc<ReferenceTracker>,
    index: WorldGraphIndex,
    cells: DashMap<GridCellCoordinate, Arc<WorldCell>>,
    /// Last scan per repository folder
    presence: DashMap<PathBuf, Arc<RepositoryScan>>,
    cutter: Box<dyn RegionCutter>,
    builder: CellGraphBuilder,
    parallelism: usize,
    keep_raw: bool,
}

impl GridShared {
    pub(crate) fn geometry(&self) -> &Grid {
        &self.geometry
    }

    pub(crate) fn repository(&self) -> &Repository {
        &self.repository
    }

    pub(crate) fn tracker(&self) -> &Arc<ReferenceTracker> {
        &self.tracker
    }

    pub(crate) fn index(&self) -> &WorldGraphIndex {
        &self.index
    }

    /// The cached cell at `coordinate`, created on first request
    pub(crate) fn world_cell(self: &Arc<Self>, coordinate: GridCellCoordinate) -> Option<Arc<WorldCell>> {
        if !self.inclusion.contains(coordinate) {
            return None;
        }
        if let Some(cell) = self.cells.get(&coordinate) {
            return Some(Arc::clone(cell.value()));
        }
        let cell = self
            .cells
            .entry(coordinate)
            .or_insert_with(|| Arc::new(WorldCell::new(coordinate, self)));
        Some(Arc::clone(cell.value()))
    }

    pub(crate) fn neighbors_of(self: &Arc<Self>, coordinate: GridCellCoordinate) -> WorldCellList {
        self.geometry
            .neighbors(coordinate)
            .into_iter()
            .filter_map(|neighbor| self.world_cell(neighbor))
            .collect()
    }

    /// Cached scan of `repository`, scanning it on first use
    pub(crate) fn presence(&self, repository: &Repository) -> Arc<RepositoryScan> {
        if let Some(scan) = self.presence.get(repository.folder()) {
            return Arc::clone(scan.value());
        }
        self.refresh_presence(repository)
    }

    pub(crate) fn refresh_presence(&self, repository: &Repository) -> Arc<RepositoryScan> {
        let scan = Arc::new(repository.scan());
        self.presence
            .insert(repository.folder().to_path_buf(), Arc::clone(&scan));
        scan
    }
}

// ============================================================================
// WorldGrid
// ============================================================================

/// Spatially partitioned road-network graph over one repository
#[derive(Clone)]
pub struct WorldGrid {
    shared: Arc<GridShared>,
}

impl std::fmt::Debug for WorldGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGrid")
            .field("mode", &self.shared.mode)
            .field("repository", &self.shared.repository)
            .field("cell_size", &self.shared.geometry.cell_size())
            .field("cells", &self.shared.cells.len())
            .finish()
    }
}

impl WorldGrid {
    /// Open `repository` in `mode` with the JSON region cutter
    pub fn open(repository: Repository, mode: GridMode, options: GridOptions) -> Result<Self> {
        Self::with_cutter(repository, mode, options, Box::new(JsonRegionCutter::new()))
    }

    /// Open using the repository and settings from a loaded configuration
    pub fn from_config(
        config: &WorldGraphConfig,
        base_dir: &std::path::Path,
        mode: GridMode,
    ) -> Result<Self> {
        let repository = Repository::new(
            config.storage.repository_name.clone(),
            config.repository_dir(base_dir),
        );
        Self::open(repository, mode, GridOptions::from(config))
    }

    /// Open with a custom region cutter
    pub fn with_cutter(
        repository: Repository,
        mode: GridMode,
        options: GridOptions,
        cutter: Box<dyn RegionCutter>,
    ) -> Result<Self> {
        let geometry = Grid::new(options.cell_size_degrees)?;

        let index = match mode {
            GridMode::Read => {
                if !repository.exists() {
                    return Err(WorldGraphError::RepositoryMissing(
                        repository.folder().to_path_buf(),
                    ));
                }
                WorldGraphIndex::open(&repository.index_path())?
            }
            GridMode::Write => {
                std::fs::create_dir_all(repository.folder())?;
                Self::open_or_create_index(&repository)?
            }
            GridMode::Create => {
                std::fs::create_dir_all(repository.folder())?;
                WorldGraphIndex::create()
            }
        };

        let cache_path = repository.inclusion_cache_path();
        let inclusion = match mode {
            GridMode::Read => InclusionSet::load_cached(&cache_path, geometry, &options.regions)
                .unwrap_or_else(|| InclusionSet::compute(geometry, &options.regions)),
            GridMode::Write | GridMode::Create => {
                InclusionSet::load_or_compute(&cache_path, geometry, &options.regions)
            }
        };

        info!(
            "Opened world grid {} ({}) with {} included cells",
            repository.name(),
            mode,
            inclusion.len()
        );

        let shared = Arc::new(GridShared {
            mode,
            geometry,
            repository,
            inclusion,
            tracker: Arc::new(ReferenceTracker::new(options.tracker)),
            index,
            cells: DashMap::new(),
            presence: DashMap::new(),
            cutter,
            builder: CellGraphBuilder::new(),
            parallelism: options.parallelism,
            keep_raw: options.keep_raw,
        });
        shared.refresh_presence(&shared.repository);

        Ok(Self { shared })
    }

    fn open_or_create_index(repository: &Repository) -> Result<WorldGraphIndex> {
        let path = repository.index_path();
        if !path.exists() {
            return Ok(WorldGraphIndex::create());
        }
        match WorldGraphIndex::open(&path) {
            Ok(index) => Ok(index),
            Err(WorldGraphError::IndexVersionMismatch { expected, found }) => {
                warn!(
                    "Discarding index {:?} with version {} (expected {}); it will be rebuilt",
                    path, found, expected
                );
                Ok(WorldGraphIndex::create())
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mode(&self) -> GridMode {
        self.shared.mode
    }

    pub fn geometry(&self) -> &Grid {
        &self.shared.geometry
    }

    pub fn repository(&self) -> &Repository {
        &self.shared.repository
    }

    pub fn inclusion(&self) -> &InclusionSet {
        &self.shared.inclusion
    }

    pub fn tracker(&self) -> &Arc<ReferenceTracker> {
        &self.shared.tracker
    }

    pub fn index(&self) -> &WorldGraphIndex {
        &self.shared.index
    }

    // =========================================================================
    // Cell lookup
    // =========================================================================

    /// The cell at `coordinate`, or `None` outside the inclusion set.
    ///
    /// Repeated calls return the same `Arc`.
    pub fn world_cell(&self, coordinate: GridCellCoordinate) -> Option<Arc<WorldCell>> {
        self.shared.world_cell(coordinate)
    }

    /// The cell containing `location`
    pub fn world_cell_at(&self, location: Location) -> Option<Arc<WorldCell>> {
        self.shared
            .geometry
            .coordinate_for(location)
            .and_then(|coordinate| self.world_cell(coordinate))
    }

    /// The cell called `name`; malformed or unknown names give `None`
    pub fn world_cell_named(&self, name: &str) -> Option<Arc<WorldCell>> {
        match GridCellCoordinate::parse(name) {
            Ok(coordinate) => self.world_cell(coordinate),
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    /// The cell with the given dense identifier
    pub fn world_cell_for_identifier(&self, identifier: u64) -> Option<Arc<WorldCell>> {
        self.shared
            .geometry
            .coordinate_of(identifier)
            .and_then(|coordinate| self.world_cell(coordinate))
    }

    /// Every included cell
    pub fn cells(&self) -> WorldCellList {
        self.shared
            .inclusion
            .iter()
            .filter_map(|coordinate| self.world_cell(coordinate))
            .collect()
    }

    /// Included cells inside `bounds` that have a file of `kind` in
    /// `repository`
    pub fn cells_in(&self, repository: &Repository, kind: DataKind, bounds: &Rectangle) -> WorldCellList {
        let scan = self.shared.presence(repository);
        self.shared
            .inclusion
            .iter_within(bounds)
            .filter(|coordinate| scan.has(*coordinate, kind))
            .filter_map(|coordinate| self.world_cell(coordinate))
            .collect()
    }

    /// Included cells in the ring around `cell`
    pub fn neighbors(&self, cell: &WorldCell) -> WorldCellList {
        self.shared.neighbors_of(cell.coordinate())
    }

    /// Cells whose graph is currently resident
    pub fn loaded_cells(&self) -> WorldCellList {
        let mut cells: Vec<_> = self
            .shared
            .cells
            .iter()
            .filter(|entry| entry.value().is_loaded())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        cells.sort();
        WorldCellList::new(cells)
    }

    /// Re-scan `repository` for cell files
    pub fn refresh_presence(&self, repository: &Repository) -> Arc<RepositoryScan> {
        self.shared.refresh_presence(repository)
    }

    /// Release every resident cell graph
    pub fn unload_all(&self) {
        for entry in self.shared.cells.iter() {
            entry.value().unload();
        }
    }

    // =========================================================================
    // Index pass-throughs
    // =========================================================================

    /// Cell owning `way_id`, without loading any cell
    pub fn cell_for_way_identifier(&self, way_id: i64) -> Result<Option<Arc<WorldCell>>> {
        Ok(self
            .shared
            .index
            .cell_for_way_identifier(way_id)?
            .and_then(|identifier| self.world_cell_for_identifier(identifier)))
    }

    pub fn place_for_location(&self, location: Location) -> Result<Option<IndexedPlace>> {
        self.shared.index.place_for_location(location)
    }

    pub fn places_inside(&self, bounds: &Rectangle) -> Result<Vec<IndexedPlace>> {
        self.shared.index.places_inside(bounds)
    }

    pub fn cells_for_tmc_table(&self, table: u32) -> Result<WorldCellList> {
        Ok(self
            .shared
            .index
            .cells_for_tmc_table(table)?
            .into_iter()
            .filter_map(|identifier| self.world_cell_for_identifier(identifier))
            .collect())
    }

    /// Persist the index to the repository
    pub fn save_index(&self) -> Result<()> {
        if self.shared.mode == GridMode::Read {
            return Err(WorldGraphError::ReadOnly);
        }
        self.shared
            .index
            .save(&self.shared.repository.index_path())
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Cut `source` into cells, build and write each cell graph into
    /// `repository`, index them and save the index.
    ///
    /// Each cell is written atomically; a failing cell is logged and
    /// reported in the outcome while the others are kept.
    pub fn extract(&self, repository: &Repository, source: &dyn RawDataSource) -> Result<ExtractionOutcome> {
        if self.shared.mode == GridMode::Read {
            return Err(WorldGraphError::ReadOnly);
        }

        info!("Extracting {} into {}", source.describe(), repository.name());
        let network = source.read()?;
        std::fs::create_dir_all(repository.folder())?;

        let geometry = self.shared.geometry;
        let inclusion = &self.shared.inclusion;
        let region_for = move |location: Location| {
            geometry
                .coordinate_for(location)
                .filter(|coordinate| inclusion.contains(*coordinate))
        };
        let files = self
            .shared
            .cutter
            .cut(&network, &region_for, repository.folder())?;
        drop(network);

        let expected = files.len();
        let built = self.build_cells(repository, &files);

        let mut outcome = ExtractionOutcome {
            expected,
            ..Default::default()
        };
        for (file, result) in files.iter().zip(built) {
            let coordinate = file.coordinate;
            let indexed = result.and_then(|graph| {
                self.shared
                    .index
                    .index(geometry.identifier(coordinate), &graph)
            });
            match indexed {
                Ok(()) => outcome.produced += 1,
                Err(e) => {
                    warn!("Failed to extract {}: {}", coordinate, e);
                    outcome.failed.push(coordinate);
                }
            }
            if !self.shared.keep_raw {
                if let Err(e) = std::fs::remove_file(&file.path) {
                    debug!("Could not remove raw extract {:?}: {}", file.path, e);
                }
            }
        }

        self.shared.refresh_presence(repository);
        if repository == &self.shared.repository {
            // Resident graphs of rewritten cells are stale
            for file in &files {
                if let Some(cell) = self.shared.cells.get(&file.coordinate) {
                    cell.value().unload();
                }
            }
        }
        self.shared.index.save(&repository.index_path())?;

        info!(
            "Extracted {} of {} cells into {}",
            outcome.produced,
            outcome.expected,
            repository.name()
        );
        Ok(outcome)
    }

    /// Build and write every cut file, in parallel
    fn build_cells(&self, repository: &Repository, files: &[CutFile]) -> Vec<Result<CellGraph>> {
        let build = || {
            files
                .par_iter()
                .map(|file| self.build_cell(repository, file))
                .collect::<Vec<_>>()
        };

        if self.shared.parallelism == 0 {
            return build();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.shared.parallelism)
            .build()
        {
            Ok(pool) => pool.install(build),
            Err(e) => {
                warn!("Falling back to the global thread pool: {}", e);
                build()
            }
        }
    }

    fn build_cell(&self, repository: &Repository, file: &CutFile) -> Result<CellGraph> {
        let network = self.shared.cutter.read_cell(&file.path)?;
        let graph = self.shared.builder.build(&network);
        CellStore::save_graph(
            &repository.graph_path(file.coordinate),
            &file.coordinate.name(),
            &graph,
        )?;
        debug!(
            "Built {}: {} vertices, {} edges",
            file.coordinate,
            graph.vertex_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> WorldGridStats {
        let scan = self.shared.presence(&self.shared.repository);
        let metrics = self.shared.tracker.metrics();
        WorldGridStats {
            mode: self.shared.mode,
            repository: self.shared.repository.folder().to_path_buf(),
            cell_size_degrees: self.shared.geometry.cell_size(),
            included_cells: self.shared.inclusion.len(),
            created_cells: self.shared.cells.len(),
            loaded_cells: self
                .shared
                .cells
                .iter()
                .filter(|entry| entry.value().is_loaded())
                .count(),
            graph_files: scan.count(DataKind::Graph),
            graph_bytes: scan.total_size(DataKind::Graph),
            raw_files: scan.count(DataKind::Pbf),
            strong_bytes: self.shared.tracker.strong_bytes(),
            budget_bytes: self.shared.tracker.config().budget_bytes,
            cache_hit_rate: metrics.hit_rate(),
            tracker: metrics,
            loaded_index_fields: self.shared.index.loaded_fields(),
        }
    }
}
