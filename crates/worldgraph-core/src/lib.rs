//! WorldGraph Core - planet-scale road-network graph store
//!
//! This crate splits a road network into a grid of independently persisted
//! cells and serves it through a memory-bounded cache:
//! - Grid geometry and cell naming
//! - Per-cell graphs backed by petgraph and persisted in SQLite
//! - Size-aware virtual references with a budgeted LRU tracker
//! - Cross-cell element sequences with turn-restriction de-duplication
//! - A lazily loaded grid-wide index for places, ways and TMC tables
//! - Extraction of raw OSM-like input into cells

pub mod extract;
pub mod geography;
pub mod graph;
pub mod grid_cell;
pub mod raw;
pub mod reference;
pub mod store;
pub mod world;

// Geometry re-exports
pub use geography::{Distance, Location, Rectangle};
pub use grid_cell::{Grid, GridCellCoordinate, GridError};

// Graph re-exports
pub use graph::{CellGraph, Edge, Place, Relation, RestrictionKind, Vertex};

// Reference re-exports
pub use reference::{
    Demotion, EstimatedSize, LoadError, ReferenceTracker, RetentionMode, TrackerConfig,
    TrackerMetrics, VirtualReference,
};

// Extraction re-exports
pub use extract::{CellGraphBuilder, CutFile, ExtractError, JsonRegionCutter, RegionCutter};
pub use raw::{JsonRawSource, RawDataError, RawDataSource, RawNetwork};

// Store re-exports
pub use store::{Archive, ArchiveMode, CellStore, StoreError};

// World re-exports
pub use world::{
    DataKind, ExtractionOutcome, GridMode, GridOptions, IndexField, IndexedPlace, Repository,
    WorldCell, WorldCellList, WorldEdge, WorldGraphError, WorldGraphIndex, WorldGrid,
    WorldGridStats, WorldRelation, WorldVertex,
};
