//! World Cell: one partition of the world graph.
//!
//! A cell knows its place in the grid and holds a virtual reference to its
//! graph. The graph is read from `cell-x-y.graph` on first access and may be
//! reclaimed and re-read at any time under the tracker's budget.

use super::cell_list::WorldCellList;
use super::error::{Result, WorldGraphError};
use super::grid::GridShared;
use super::repository::{DataKind, Repository};
use crate::geography::{Location, Rectangle};
use crate::graph::CellGraph;
use crate::grid_cell::{Grid, GridCellCoordinate};
use crate::reference::{EstimatedSize, LoadError, Retainable, RetentionMode, VirtualReference};
use crate::store::CellStore;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

impl EstimatedSize for CellGraph {
    fn estimated_memory_size(&self) -> Option<usize> {
        Some(CellGraph::estimated_memory_size(self))
    }
}

/// One cell of a [`super::WorldGrid`].
///
/// Equality, hashing and ordering use the coordinate only.
pub struct WorldCell {
    coordinate: GridCellCoordinate,
    identifier: u64,
    geometry: Grid,
    bounds: Rectangle,
    grid: Weak<GridShared>,
    graph: Arc<VirtualReference<CellGraph>>,
}

impl WorldCell {
    pub(crate) fn new(coordinate: GridCellCoordinate, shared: &Arc<GridShared>) -> Self {
        let geometry = *shared.geometry();
        let name = coordinate.name();
        let path = shared.repository().graph_path(coordinate);
        let loader_name = name.clone();
        let graph = VirtualReference::new(name, Arc::clone(shared.tracker()), move || {
            CellStore::load_graph(&path).map_err(|e| LoadError::unavailable(loader_name.clone(), e))
        });

        Self {
            coordinate,
            identifier: geometry.identifier(coordinate),
            geometry,
            bounds: geometry.bounds(coordinate),
            grid: Arc::downgrade(shared),
            graph,
        }
    }

    pub fn coordinate(&self) -> GridCellCoordinate {
        self.coordinate
    }

    /// Dense row-major identifier, as stored in the index
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    /// `cell-<latitudeIndex>-<longitudeIndex>`
    pub fn name(&self) -> String {
        self.coordinate.name()
    }

    pub fn bounds(&self) -> Rectangle {
        self.bounds
    }

    /// True when this is the one cell whose coordinate `location` maps to.
    ///
    /// Unlike `bounds().contains()`, a location on a shared edge belongs
    /// to exactly one cell.
    pub fn contains(&self, location: Location) -> bool {
        self.geometry.coordinate_for(location) == Some(self.coordinate)
    }

    // =========================================================================
    // Graph access
    // =========================================================================

    /// The cell's graph, loading it if it is not resident
    pub fn cell_graph(&self) -> Result<Arc<CellGraph>> {
        self.graph
            .get()
            .map_err(|source| WorldGraphError::LoadUnavailable {
                cell: self.name(),
                source,
            })
    }

    /// The graph only if it is already resident
    pub fn cell_graph_if_loaded(&self) -> Option<Arc<CellGraph>> {
        self.graph.get_if_loaded()
    }

    pub fn is_loaded(&self) -> bool {
        self.graph.is_resident()
    }

    /// Drop the graph and its derived structures; the next access reloads
    pub fn unload(&self) {
        if let Some(graph) = self.graph.get_if_loaded() {
            graph.unload();
        }
        self.graph.unload();
    }

    pub fn load_count(&self) -> u64 {
        self.graph.load_count()
    }

    pub fn retention(&self) -> RetentionMode {
        self.graph.retention()
    }

    // =========================================================================
    // Sizes and presence
    // =========================================================================

    /// Estimated in-memory size: the loaded graph's own estimate, else the
    /// size recorded in the index
    pub fn estimated_memory_size(&self) -> Option<u64> {
        if let Some(graph) = self.cell_graph_if_loaded() {
            return Some(graph.estimated_memory_size() as u64);
        }
        let grid = self.grid.upgrade()?;
        grid.index().memory_size(self.identifier).ok().flatten()
    }

    pub fn has_graph(&self, repository: &Repository) -> bool {
        self.disk_size(repository, DataKind::Graph).is_some()
    }

    pub fn has_pbf(&self, repository: &Repository) -> bool {
        self.disk_size(repository, DataKind::Pbf).is_some()
    }

    /// Bytes on disk from the grid's last scan of `repository`
    pub fn disk_size(&self, repository: &Repository, kind: DataKind) -> Option<u64> {
        let grid = self.grid.upgrade()?;
        grid.presence(repository).size(self.coordinate, kind)
    }

    // =========================================================================
    // Neighbourhood
    // =========================================================================

    /// Included cells in the ring around this one
    pub fn neighbors(&self) -> WorldCellList {
        match self.grid.upgrade() {
            Some(grid) => grid.neighbors_of(self.coordinate),
            None => WorldCellList::default(),
        }
    }

    /// This cell followed by its neighbours
    pub fn neighbors_and_this(&self) -> WorldCellList {
        let Some(grid) = self.grid.upgrade() else {
            return WorldCellList::default();
        };
        let mut list = WorldCellList::default();
        if let Some(this) = grid.world_cell(self.coordinate) {
            list.push(this);
        }
        list.extend(grid.neighbors_of(self.coordinate));
        list
    }
}

impl std::fmt::Debug for WorldCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldCell")
            .field("coordinate", &self.coordinate)
            .field("retention", &self.retention())
            .field("loads", &self.load_count())
            .finish()
    }
}

impl std::fmt::Display for WorldCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.coordinate, f)
    }
}

impl PartialEq for WorldCell {
    fn eq(&self, other: &Self) -> bool {
        self.coordinate == other.coordinate
    }
}

impl Eq for WorldCell {}

impl Hash for WorldCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coordinate.hash(state);
    }
}

impl PartialOrd for WorldCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorldCell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.coordinate.cmp(&other.coordinate)
    }
}
