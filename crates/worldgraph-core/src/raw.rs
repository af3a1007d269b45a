//! Raw OSM-like input consumed by extraction.
//!
//! Raw data is a flat list of nodes, ways and turn restrictions with their
//! tags, stored as JSON. A [`RawDataSource`] hands the whole network to the
//! region cutter, which splits it into one raw file per cell.

use crate::geography::Location;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or writing raw network files.
#[derive(Debug, Error)]
pub enum RawDataError {
    #[error("failed to read raw data '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse raw data '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tag map shared by every raw element.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl RawNode {
    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWay {
    pub id: i64,
    /// Node ids in drawing order
    pub nodes: Vec<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl RawWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRestriction {
    pub id: i64,
    /// OSM `restriction` value, e.g. `no_left_turn`
    pub restriction: String,
    pub from_way: i64,
    #[serde(default)]
    pub via_node: Option<i64>,
    pub to_way: i64,
}

/// A complete raw network, either the whole input or one cell's cut.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNetwork {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub ways: Vec<RawWay>,
    #[serde(default)]
    pub restrictions: Vec<RawRestriction>,
}

impl RawNetwork {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ways.is_empty() && self.restrictions.is_empty()
    }

    /// Node id → node position in `nodes`.
    pub fn node_positions(&self) -> HashMap<i64, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id, position))
            .collect()
    }

    pub fn read_json(path: &Path) -> Result<Self, RawDataError> {
        let content = std::fs::read_to_string(path).map_err(|source| RawDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| RawDataError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<(), RawDataError> {
        let content = serde_json::to_string(self).map_err(|source| RawDataError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| RawDataError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Anything that can produce a raw network for extraction.
pub trait RawDataSource: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    fn read(&self) -> Result<RawNetwork, RawDataError>;
}

/// A raw network stored in one JSON file.
#[derive(Debug, Clone)]
pub struct JsonRawSource {
    path: PathBuf,
}

impl JsonRawSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RawDataSource for JsonRawSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<RawNetwork, RawDataError> {
        RawNetwork::read_json(&self.path)
    }
}

impl RawDataSource for RawNetwork {
    fn describe(&self) -> String {
        format!(
            "in-memory network ({} nodes, {} ways)",
            self.nodes.len(),
            self.ways.len()
        )
    }

    fn read(&self) -> Result<RawNetwork, RawDataError> {
        Ok(self.clone())
    }
}
