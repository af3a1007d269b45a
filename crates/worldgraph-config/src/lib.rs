//! WorldGraph Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.worldgraph/config.toml`
//! - Local config: `.worldgraph/config.toml` (next to the data)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default angular size of one grid cell, in degrees.
pub const DEFAULT_CELL_SIZE_DEGREES: f64 = 1.0;

/// Default strongly retained memory budget (512 MB).
pub const DEFAULT_MEMORY_BUDGET_MB: u64 = 512;

/// Default size assumed for a cell whose footprint is not known yet.
pub const DEFAULT_UNKNOWN_CELL_SIZE_MB: u64 = 64;

/// Root configuration for WorldGraph.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WorldGraphConfig {
    /// Grid geometry and inclusion regions
    pub grid: GridConfig,

    /// Cell graph cache configuration
    pub cache: CacheConfig,

    /// Repository folder configuration
    pub storage: StorageConfig,

    /// Extraction configuration
    pub extraction: ExtractionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Grid geometry configuration.
///
/// # Example TOML
///
/// ```toml
/// [grid]
/// cell_size_degrees = 0.5
///
/// [[grid.regions]]
/// name = "benelux"
/// min_latitude = 49.4
/// min_longitude = 2.5
/// max_latitude = 53.6
/// max_longitude = 7.3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// Angular size of one square cell, in degrees
    pub cell_size_degrees: f64,

    /// Regions whose cells are included. Empty means the whole world.
    pub regions: Vec<RegionConfig>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size_degrees: DEFAULT_CELL_SIZE_DEGREES,
            regions: Vec::new(),
        }
    }
}

impl GridConfig {
    /// Validate grid geometry and every configured region.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size_degrees > 0.0 && self.cell_size_degrees <= 180.0) {
            return Err(ConfigError::invalid_value(
                "grid.cell_size_degrees",
                format!(
                    "must be within (0, 180], got {}",
                    self.cell_size_degrees
                ),
            ));
        }
        for region in &self.regions {
            region.validate()?;
        }
        Ok(())
    }
}

/// A rectangular region of interest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    /// Optional label, used only in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub min_latitude: f64,
    pub min_longitude: f64,
    pub max_latitude: f64,
    pub max_longitude: f64,
}

impl RegionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let label = self.name.as_deref().unwrap_or("<unnamed>");
        let in_range = |lat: f64, lon: f64| {
            (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
        };
        if !in_range(self.min_latitude, self.min_longitude)
            || !in_range(self.max_latitude, self.max_longitude)
        {
            return Err(ConfigError::invalid_value(
                "grid.regions",
                format!("region '{}' lies outside the world extent", label),
            ));
        }
        if self.min_latitude > self.max_latitude || self.min_longitude > self.max_longitude {
            return Err(ConfigError::invalid_value(
                "grid.regions",
                format!("region '{}' has inverted corners", label),
            ));
        }
        Ok(())
    }
}

/// How references are demoted once the strong budget is spent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DemotionMode {
    /// Keep demoted values until the soft budget overflows (default)
    #[default]
    Soft,
    /// Release demoted values as soon as no caller holds them
    Weak,
}

impl std::fmt::Display for DemotionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Soft => write!(f, "soft"),
            Self::Weak => write!(f, "weak"),
        }
    }
}

impl std::str::FromStr for DemotionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "weak" => Ok(Self::Weak),
            _ => Err(ConfigError::invalid_value(
                "cache.demotion",
                format!("unknown demotion mode '{}'. Valid values: soft, weak", s),
            )),
        }
    }
}

/// Cell graph cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Budget for strongly retained cell graphs, in MB
    pub memory_budget_mb: u64,

    /// Mode assigned to references that fall outside the budget
    pub demotion: DemotionMode,

    /// Budget for softly retained cell graphs, in MB
    pub soft_budget_mb: u64,

    /// Size assumed for a cell graph of unknown footprint, in MB
    pub unknown_cell_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: DEFAULT_MEMORY_BUDGET_MB,
            demotion: DemotionMode::default(),
            soft_budget_mb: DEFAULT_MEMORY_BUDGET_MB,
            unknown_cell_size_mb: DEFAULT_UNKNOWN_CELL_SIZE_MB,
        }
    }
}

impl CacheConfig {
    /// Strong budget in bytes.
    pub fn memory_budget_bytes(&self) -> usize {
        mb_to_bytes(self.memory_budget_mb)
    }

    /// Soft budget in bytes.
    pub fn soft_budget_bytes(&self) -> usize {
        mb_to_bytes(self.soft_budget_mb)
    }

    /// Unknown-size estimate in bytes.
    pub fn unknown_cell_size_bytes(&self) -> usize {
        mb_to_bytes(self.unknown_cell_size_mb)
    }
}

fn mb_to_bytes(mb: u64) -> usize {
    usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
}

/// Repository folder configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Folder holding `index.world` and the cell files (default: `world`)
    pub repository: PathBuf,

    /// Logical repository name used for presence caches
    pub repository_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("world"),
            repository_name: "default".to_string(),
        }
    }
}

/// Extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Parallelism level (0 = auto-detect)
    pub parallelism: usize,

    /// Keep per-cell raw extracts next to the graphs
    pub keep_raw: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override repository folder
    pub repository: Option<PathBuf>,

    /// Override strong memory budget (MB)
    pub memory_budget_mb: Option<u64>,

    /// Override demotion mode
    pub demotion: Option<DemotionMode>,

    /// Override cell size
    pub cell_size_degrees: Option<f64>,

    /// Override log level
    pub log_level: Option<String>,

    /// Override parallelism
    pub parallelism: Option<usize>,
}

impl WorldGraphConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref repository) = overrides.repository {
            self.storage.repository = repository.clone();
        }

        if let Some(budget) = overrides.memory_budget_mb {
            self.cache.memory_budget_mb = budget;
        }

        if let Some(demotion) = overrides.demotion {
            self.cache.demotion = demotion;
        }

        if let Some(size) = overrides.cell_size_degrees {
            self.grid.cell_size_degrees = size;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(parallelism) = overrides.parallelism {
            self.extraction.parallelism = parallelism;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.cache.memory_budget_mb == 0 {
            return Err(ConfigError::invalid_value(
                "cache.memory_budget_mb",
                "must be greater than zero",
            ));
        }
        if self.storage.repository_name.is_empty() {
            return Err(ConfigError::invalid_value(
                "storage.repository_name",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Resolve the repository folder against a base directory.
    pub fn repository_dir(&self, base: &Path) -> PathBuf {
        if self.storage.repository.is_absolute() {
            self.storage.repository.clone()
        } else {
            base.join(&self.storage.repository)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = WorldGraphConfig::default();
        assert_eq!(config.grid.cell_size_degrees, 1.0);
        assert!(config.grid.regions.is_empty());
        assert_eq!(config.cache.memory_budget_mb, 512);
        assert_eq!(config.cache.demotion, DemotionMode::Soft);
        assert_eq!(config.storage.repository, PathBuf::from("world"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = WorldGraphConfig::default();
        let overrides = ConfigOverrides {
            repository: Some(PathBuf::from("/data/planet")),
            memory_budget_mb: Some(2048),
            demotion: Some(DemotionMode::Weak),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        config.apply_overrides(&overrides);

        assert_eq!(config.storage.repository, PathBuf::from("/data/planet"));
        assert_eq!(config.cache.memory_budget_mb, 2048);
        assert_eq!(config.cache.demotion, DemotionMode::Weak);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_repository_dir_resolution() {
        let config = WorldGraphConfig::default();
        assert_eq!(
            config.repository_dir(Path::new("/srv")),
            PathBuf::from("/srv/world")
        );

        let mut config = WorldGraphConfig::default();
        config.storage.repository = PathBuf::from("/absolute/world");
        assert_eq!(
            config.repository_dir(Path::new("/srv")),
            PathBuf::from("/absolute/world")
        );
    }

    #[test]
    fn test_validate_rejects_bad_cell_size() {
        let mut config = WorldGraphConfig::default();
        config.grid.cell_size_degrees = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cell_size_degrees"));
    }

    #[test]
    fn test_validate_rejects_inverted_region() {
        let mut config = WorldGraphConfig::default();
        config.grid.regions.push(RegionConfig {
            name: Some("upside-down".to_string()),
            min_latitude: 10.0,
            min_longitude: 0.0,
            max_latitude: 5.0,
            max_longitude: 1.0,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("upside-down"));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = WorldGraphConfig::default();
        config.cache.memory_budget_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_demotion_mode_from_str() {
        assert_eq!("soft".parse::<DemotionMode>().unwrap(), DemotionMode::Soft);
        assert_eq!("WEAK".parse::<DemotionMode>().unwrap(), DemotionMode::Weak);
        assert!("strong".parse::<DemotionMode>().is_err());
        assert_eq!(DemotionMode::Weak.to_string(), "weak");
    }

    #[test]
    fn test_cache_budget_bytes() {
        let cache = CacheConfig {
            memory_budget_mb: 2,
            ..Default::default()
        };
        assert_eq!(cache.memory_budget_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = WorldGraphConfig::default();
        config.grid.cell_size_degrees = 0.25;
        config.grid.regions.push(RegionConfig {
            name: Some("alps".to_string()),
            min_latitude: 45.0,
            min_longitude: 5.0,
            max_latitude: 48.0,
            max_longitude: 16.0,
        });
        config.cache.demotion = DemotionMode::Weak;
        config.logging.format = LogFormat::Json;

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: WorldGraphConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }
}
