//! The partitioned world graph.
//!
//! ```text
//! WorldGrid ──owns──▶ WorldCell (one per included coordinate, created lazily)
//!     │                   └── VirtualReference<CellGraph> ──tracked by──▶ ReferenceTracker
//!     ├── InclusionSet   which cells exist
//!     └── WorldGraphIndex places, way → cell, TMC table → cells, memory sizes
//! ```
//!
//! Cells hold a weak back-reference to the grid; the grid is the only owner
//! of the cell map.

pub mod cell;
pub mod cell_list;
pub mod error;
pub mod grid;
pub mod inclusion;
pub mod index;
pub mod repository;

pub use cell::WorldCell;
pub use cell_list::{WorldCellList, WorldEdge, WorldRelation, WorldVertex};
pub use error::{Result, WorldGraphError};
pub use grid::{ExtractionOutcome, GridMode, GridOptions, WorldGrid, WorldGridStats};
pub use inclusion::InclusionSet;
pub use index::{IndexField, IndexedPlace, WorldGraphIndex, INDEX_FORMAT_VERSION};
pub use repository::{DataKind, Repository, RepositoryScan};
