//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.worldgraph/config.toml`
//! 2. Local config: `.worldgraph/config.toml` (under the base directory)
//! 3. CLI overrides
//!
//! Later sources override earlier ones.

use crate::error::ConfigError;
use crate::{
    CacheConfig, ConfigOverrides, ExtractionConfig, GridConfig, LoggingConfig, StorageConfig,
    WorldGraphConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".worldgraph";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".worldgraph";

/// Configuration loader with inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.worldgraph`)
    global_config_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.worldgraph`).
    pub fn new() -> Self {
        Self {
            global_config_dir: dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR)),
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path under a base directory.
    pub fn local_config_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates.
    pub fn load(
        &self,
        base_dir: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<WorldGraphConfig, ConfigError> {
        let mut config = WorldGraphConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(base_dir)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from one explicit file, then apply overrides.
    pub fn load_file(
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<WorldGraphConfig, ConfigError> {
        debug!("Loading config from {:?}", path);
        let mut config = merge_configs(WorldGraphConfig::default(), load_config_file(path)?);
        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&self) -> Result<Option<WorldGraphConfig>, ConfigError> {
        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        load_config_file(&global_path).map(Some)
    }

    /// Load only the local configuration.
    pub fn load_local(&self, base_dir: &Path) -> Result<Option<WorldGraphConfig>, ConfigError> {
        let local_path = self.local_config_path(base_dir);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }
}

fn load_config_file(path: &Path) -> Result<WorldGraphConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// A field in `overlay` only wins when it differs from its default, so a
/// partial file does not reset values set by an earlier layer.
fn merge_configs(base: WorldGraphConfig, overlay: WorldGraphConfig) -> WorldGraphConfig {
    WorldGraphConfig {
        grid: merge_grid(base.grid, overlay.grid),
        cache: merge_cache(base.cache, overlay.cache),
        storage: merge_storage(base.storage, overlay.storage),
        extraction: merge_extraction(base.extraction, overlay.extraction),
        logging: merge_logging(base.logging, overlay.logging),
    }
}

fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

fn merge_grid(base: GridConfig, overlay: GridConfig) -> GridConfig {
    let defaults = GridConfig::default();
    GridConfig {
        cell_size_degrees: pick(
            base.cell_size_degrees,
            overlay.cell_size_degrees,
            defaults.cell_size_degrees,
        ),
        // Regions replace rather than extend: a layer describes one coverage.
        regions: if overlay.regions.is_empty() {
            base.regions
        } else {
            overlay.regions
        },
    }
}

fn merge_cache(base: CacheConfig, overlay: CacheConfig) -> CacheConfig {
    let defaults = CacheConfig::default();
    CacheConfig {
        memory_budget_mb: pick(
            base.memory_budget_mb,
            overlay.memory_budget_mb,
            defaults.memory_budget_mb,
        ),
        demotion: pick(base.demotion, overlay.demotion, defaults.demotion),
        soft_budget_mb: pick(
            base.soft_budget_mb,
            overlay.soft_budget_mb,
            defaults.soft_budget_mb,
        ),
        unknown_cell_size_mb: pick(
            base.unknown_cell_size_mb,
            overlay.unknown_cell_size_mb,
            defaults.unknown_cell_size_mb,
        ),
    }
}

fn merge_storage(base: StorageConfig, overlay: StorageConfig) -> StorageConfig {
    let defaults = StorageConfig::default();
    StorageConfig {
        repository: pick(base.repository, overlay.repository, defaults.repository),
        repository_name: pick(
            base.repository_name,
            overlay.repository_name,
            defaults.repository_name,
        ),
    }
}

fn merge_extraction(base: ExtractionConfig, overlay: ExtractionConfig) -> ExtractionConfig {
    ExtractionConfig {
        parallelism: pick(base.parallelism, overlay.parallelism, 0),
        keep_raw: base.keep_raw || overlay.keep_raw,
    }
}

fn merge_logging(base: LoggingConfig, overlay: LoggingConfig) -> LoggingConfig {
    let defaults = LoggingConfig::default();
    LoggingConfig {
        level: pick(base.level, overlay.level, defaults.level),
        format: pick(base.format, overlay.format, defaults.format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DemotionMode, LogFormat};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn create_local_config(content: &str, dir: &Path) -> PathBuf {
        let config_dir = dir.join(".worldgraph");
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn create_global_config(content: &str, dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("config.toml"), content).unwrap();
    }

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config, WorldGraphConfig::default());
    }

    #[test]
    fn test_load_local_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        create_local_config(
            r#"
            [grid]
            cell_size_degrees = 0.5

            [[grid.regions]]
            min_latitude = 50.0
            min_longitude = 4.0
            max_latitude = 51.0
            max_longitude = 5.0

            [cache]
            demotion = "weak"
            "#,
            temp.path(),
        );

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.grid.cell_size_degrees, 0.5);
        assert_eq!(config.grid.regions.len(), 1);
        assert_eq!(config.cache.demotion, DemotionMode::Weak);
        assert_eq!(config.cache.memory_budget_mb, 512);
    }

    #[test]
    fn test_local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        create_global_config(
            r#"
            [logging]
            level = "debug"
            format = "json"

            [cache]
            memory_budget_mb = 4096
            "#,
            &global_dir,
        );

        create_local_config(
            r#"
            [cache]
            memory_budget_mb = 128
            "#,
            temp.path(),
        );

        let loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.cache.memory_budget_mb, 128);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_cli_overrides_all() {
        let temp = TempDir::new().unwrap();
        create_local_config(
            r#"
            [storage]
            repository = "/data/local"
            "#,
            temp.path(),
        );

        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let overrides = ConfigOverrides {
            repository: Some(PathBuf::from("/data/cli")),
            log_level: Some("trace".to_string()),
            ..Default::default()
        };

        let config = loader.load(temp.path(), Some(&overrides)).unwrap();

        assert_eq!(config.storage.repository, PathBuf::from("/data/cli"));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        create_local_config(
            r#"
            [grid]
            cell_size_degrees = -2.0
            "#,
            temp.path(),
        );

        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let path = create_local_config("[grid\ncell_size_degrees = ", temp.path());

        let err = ConfigLoader::load_file(&path, None).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_missing_explicit_file_names_it() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.toml");

        match ConfigLoader::load_file(&path, None) {
            Err(ConfigError::ReadFile { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_is_read_each_time() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        create_global_config("[logging]\nlevel = \"debug\"\n", &global_dir);

        let loader = ConfigLoader::with_global_dir(&global_dir);
        assert_eq!(loader.load(temp.path(), None).unwrap().logging.level, "debug");

        create_global_config("[logging]\nlevel = \"warn\"\n", &global_dir);
        assert_eq!(loader.load(temp.path(), None).unwrap().logging.level, "warn");
    }
}
