use crate::extract::ExtractError;
use crate::grid_cell::GridError;
use crate::raw::RawDataError;
use crate::reference::LoadError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the world layer: grid, cells, index and extraction
#[derive(Debug, Error)]
pub enum WorldGraphError {
    #[error("Graph of {cell} is unavailable: {source}")]
    LoadUnavailable {
        cell: String,
        #[source]
        source: LoadError,
    },

    #[error("Index format version mismatch: expected {expected}, found {found}")]
    IndexVersionMismatch { expected: String, found: String },

    #[error("Extraction produced {produced} of {expected} cells")]
    ExtractionPartialFailure { produced: usize, expected: usize },

    #[error("Repository folder not found: {0}")]
    RepositoryMissing(PathBuf),

    #[error("World grid is open read-only")]
    ReadOnly,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Raw data error: {0}")]
    Raw(#[from] RawDataError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorldGraphError>;
