//! Repository folder layout and presence scanning.
//!
//! A repository is one folder of cell files. The grid scans it once and
//! caches, per cell, which kinds of files exist and how big they are.

use crate::grid_cell::GridCellCoordinate;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// World Graph Index archive file
pub const INDEX_FILE_NAME: &str = "index.world";

/// Inclusion-set side cache
pub const INCLUSION_CACHE_FILE_NAME: &str = "cells.json";

/// Extension of persisted cell graphs
pub const GRAPH_EXTENSION: &str = "graph";

/// Extension of raw extracts in the reference layout
pub const DEFAULT_RAW_EXTENSION: &str = "osm.pbf";

/// Kind of per-cell file in a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Persisted cell graph (`cell-x-y.graph`)
    Graph,
    /// Raw extract kept for re-extraction (`cell-x-y.osm.*`)
    Pbf,
}

impl DataKind {
    /// Classify a file name, `None` for anything that is not a cell file
    pub fn classify(file_name: &str) -> Option<(GridCellCoordinate, DataKind)> {
        let (stem, extension) = file_name.split_once('.')?;
        let coordinate = GridCellCoordinate::parse(stem).ok()?;
        let kind = if extension == GRAPH_EXTENSION {
            DataKind::Graph
        } else if extension.starts_with("osm") && !extension.ends_with(".tmp") {
            DataKind::Pbf
        } else {
            return None;
        };
        Some((coordinate, kind))
    }
}

/// A named repository folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    name: String,
    folder: PathBuf,
}

impl Repository {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn exists(&self) -> bool {
        self.folder.is_dir()
    }

    pub fn graph_path(&self, coordinate: GridCellCoordinate) -> PathBuf {
        self.folder
            .join(format!("{}.{}", coordinate.name(), GRAPH_EXTENSION))
    }

    pub fn raw_path(&self, coordinate: GridCellCoordinate, extension: &str) -> PathBuf {
        self.folder.join(format!("{}.{}", coordinate.name(), extension))
    }

    pub fn index_path(&self) -> PathBuf {
        self.folder.join(INDEX_FILE_NAME)
    }

    pub fn inclusion_cache_path(&self) -> PathBuf {
        self.folder.join(INCLUSION_CACHE_FILE_NAME)
    }

    /// List cell files directly inside the folder.
    ///
    /// A missing folder scans as empty.
    pub fn scan(&self) -> RepositoryScan {
        let mut scan = RepositoryScan::default();
        if !self.exists() {
            return scan;
        }

        for entry in WalkDir::new(&self.folder).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error scanning repository {}: {}", self.name, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            let Some((coordinate, kind)) = DataKind::classify(&file_name) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            scan.files.insert((coordinate, kind), size);
        }

        debug!(
            "Scanned repository {}: {} graph files, {} raw files",
            self.name,
            scan.count(DataKind::Graph),
            scan.count(DataKind::Pbf)
        );
        scan
    }
}

/// Result of a repository scan: file size per (cell, kind)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryScan {
    files: HashMap<(GridCellCoordinate, DataKind), u64>,
}

impl RepositoryScan {
    pub fn has(&self, coordinate: GridCellCoordinate, kind: DataKind) -> bool {
        self.files.contains_key(&(coordinate, kind))
    }

    /// Bytes on disk, `None` when the file is absent
    pub fn size(&self, coordinate: GridCellCoordinate, kind: DataKind) -> Option<u64> {
        self.files.get(&(coordinate, kind)).copied()
    }

    pub fn coordinates(&self, kind: DataKind) -> BTreeSet<GridCellCoordinate> {
        self.files
            .keys()
            .filter(|(_, k)| *k == kind)
            .map(|(coordinate, _)| *coordinate)
            .collect()
    }

    pub fn count(&self, kind: DataKind) -> usize {
        self.files.keys().filter(|(_, k)| *k == kind).count()
    }

    pub fn total_size(&self, kind: DataKind) -> u64 {
        self.files
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, size)| size)
            .sum()
    }
}
