//! SQLite-backed persistence for cell graphs and the World Graph Index.
//!
//! ```text
//! <repository>/
//! ├── index.world           Archive: one named payload per index field
//! ├── cell-<lat>-<lon>.graph CellStore: vertices, edges, relations, places
//! └── cell-<lat>-<lon>.osm.* raw extract kept for re-extraction
//! ```

pub mod archive;
pub mod cell_store;
pub mod schema;

use rusqlite::{Connection, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;

pub use archive::{Archive, ArchiveMode};
pub use cell_store::{CellStore, CellStoreStats};
pub use schema::{ARCHIVE_FORMAT_VERSION, CELL_SCHEMA_VERSION};

/// Errors that can occur while reading or writing persisted data
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },

    #[error("File not found: {0}")]
    Missing(PathBuf),

    #[error("Corrupt data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Configure a connection with the settings shared by every store file.
///
/// Only connections that create a file switch its journal mode.
pub(crate) fn configure_connection(conn: &Connection, creating: bool) -> SqliteResult<()> {
    if creating {
        // WAL for concurrent readers while extraction writes other cells
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    // Negative value = KB
    conn.pragma_update(None, "cache_size", -16000)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}
