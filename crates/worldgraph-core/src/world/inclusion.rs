//! Inclusion set: which cells of the grid exist at all.
//!
//! Computed once from the configured regions and cached to `cells.json` in
//! the repository. The cache carries a fingerprint of the grid size and the
//! regions; a cache written for different settings is discarded.

use crate::geography::Rectangle;
use crate::grid_cell::{Grid, GridCellCoordinate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Format version of `cells.json`
pub const INCLUSION_CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct InclusionCache {
    version: u32,
    fingerprint: String,
    whole_world: bool,
    #[serde(default)]
    cells: Vec<GridCellCoordinate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Coverage {
    /// Every cell of the grid; not enumerated
    World,
    Cells(BTreeSet<GridCellCoordinate>),
}

/// Immutable set of included cells
#[derive(Debug, Clone, PartialEq)]
pub struct InclusionSet {
    grid: Grid,
    coverage: Coverage,
    fingerprint: String,
}

impl InclusionSet {
    /// Cells intersecting any of `regions`; no regions means the whole grid
    pub fn compute(grid: Grid, regions: &[Rectangle]) -> Self {
        let coverage = if regions.is_empty() {
            Coverage::World
        } else {
            Coverage::Cells(
                regions
                    .iter()
                    .flat_map(|region| grid.coordinates_intersecting(region))
                    .collect(),
            )
        };
        Self {
            grid,
            coverage,
            fingerprint: Self::fingerprint_of(&grid, regions),
        }
    }

    /// Reuse the cache at `path` if it matches the settings, otherwise
    /// compute the set and rewrite the cache.
    pub fn load_or_compute(path: &Path, grid: Grid, regions: &[Rectangle]) -> Self {
        let fingerprint = Self::fingerprint_of(&grid, regions);
        if let Some(cached) = Self::read_cache(path, grid, &fingerprint) {
            debug!("Reusing inclusion set from {:?}", path);
            return cached;
        }

        let set = Self::compute(grid, regions);
        if let Err(e) = set.write_cache(path) {
            warn!("Failed to write inclusion cache {:?}: {}", path, e);
        }
        set
    }

    /// The cached set at `path`, if it was written for these settings
    pub fn load_cached(path: &Path, grid: Grid, regions: &[Rectangle]) -> Option<Self> {
        Self::read_cache(path, grid, &Self::fingerprint_of(&grid, regions))
    }

    fn read_cache(path: &Path, grid: Grid, fingerprint: &str) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let cache: InclusionCache = match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Discarding unreadable inclusion cache {:?}: {}", path, e);
                return None;
            }
        };
        if cache.version != INCLUSION_CACHE_VERSION || cache.fingerprint != fingerprint {
            warn!("Discarding stale inclusion cache {:?}", path);
            return None;
        }
        if cache.cells.iter().any(|cell| !grid.contains(*cell)) {
            warn!("Discarding inclusion cache {:?} with out-of-grid cells", path);
            return None;
        }

        let coverage = if cache.whole_world {
            Coverage::World
        } else {
            Coverage::Cells(cache.cells.into_iter().collect())
        };
        Some(Self {
            grid,
            coverage,
            fingerprint: cache.fingerprint,
        })
    }

    fn write_cache(&self, path: &Path) -> std::io::Result<()> {
        let (whole_world, cells) = match &self.coverage {
            Coverage::World => (true, Vec::new()),
            Coverage::Cells(cells) => (false, cells.iter().copied().collect()),
        };
        let cache = InclusionCache {
            version: INCLUSION_CACHE_VERSION,
            fingerprint: self.fingerprint.clone(),
            whole_world,
            cells,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&cache)?)
    }

    /// SHA-256 over the cell size and every region, hex encoded
    pub fn fingerprint_of(grid: &Grid, regions: &[Rectangle]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(grid.cell_size().to_le_bytes());
        for region in regions {
            for value in [
                region.min.latitude,
                region.min.longitude,
                region.max.latitude,
                region.max.longitude,
            ] {
                hasher.update(value.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn contains(&self, coordinate: GridCellCoordinate) -> bool {
        match &self.coverage {
            Coverage::World => self.grid.contains(coordinate),
            Coverage::Cells(cells) => cells.contains(&coordinate),
        }
    }

    pub fn is_whole_world(&self) -> bool {
        self.coverage == Coverage::World
    }

    pub fn len(&self) -> u64 {
        match &self.coverage {
            Coverage::World => self.grid.cell_count(),
            Coverage::Cells(cells) => cells.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Included coordinates in ascending order
    pub fn iter(&self) -> Box<dyn Iterator<Item = GridCellCoordinate> + '_> {
        match &self.coverage {
            Coverage::World => Box::new(self.grid.coordinates_intersecting(&Rectangle::WORLD)),
            Coverage::Cells(cells) => Box::new(cells.iter().copied()),
        }
    }

    /// Included coordinates intersecting `bounds`, in ascending order
    pub fn iter_within<'a>(
        &'a self,
        bounds: &Rectangle,
    ) -> impl Iterator<Item = GridCellCoordinate> + 'a {
        self.grid
            .coordinates_intersecting(bounds)
            .filter(move |coordinate| self.contains(*coordinate))
    }
}
