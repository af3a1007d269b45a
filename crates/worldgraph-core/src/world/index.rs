//! World Graph Index
//!
//! Grid-wide lookups that must not force every cell to load: the places of
//! the world, estimated memory per cell, which cell owns a way and which
//! cells reference a TMC table.
//!
//! The index is persisted as one archive with an independent named field
//! per [`IndexField`]. Opening an index only validates the archive; each
//! field is decoded the first time a query needs it.

use super::error::{Result, WorldGraphError};
use crate::geography::{Location, Rectangle};
use crate::graph::{CellGraph, Place};
use crate::store::{Archive, ArchiveMode, StoreError};
use parking_lot::RwLock;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Version of the index layout inside the archive
pub const INDEX_FORMAT_VERSION: &str = "1.0";

const INDEX_VERSION_KEY: &str = "index_version";

/// Candidates compared by great-circle distance in `place_for_location`
const NEAREST_PLACE_CANDIDATES: usize = 8;

type PlacePoint = GeomWithData<[f64; 2], usize>;

/// Independently stored and loaded parts of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexField {
    Places,
    CellMemorySizes,
    WayCells,
    TmcTableCells,
}

impl IndexField {
    pub const ALL: [IndexField; 4] = [
        IndexField::Places,
        IndexField::CellMemorySizes,
        IndexField::WayCells,
        IndexField::TmcTableCells,
    ];

    /// Field name inside the archive
    pub fn name(&self) -> &'static str {
        match self {
            Self::Places => "places",
            Self::CellMemorySizes => "cell_memory_sizes",
            Self::WayCells => "way_cells",
            Self::TmcTableCells => "tmc_table_cells",
        }
    }
}

impl std::fmt::Display for IndexField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A place together with the identifier of the cell it was indexed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPlace {
    pub cell: u64,
    #[serde(flatten)]
    pub place: Place,
}

#[derive(Debug, Clone)]
enum IndexSource {
    /// Nothing persisted yet; unloaded fields start empty
    Fresh,
    Archive(PathBuf),
}

/// Lazily loaded, incrementally built grid-wide index
pub struct WorldGraphIndex {
    source: IndexSource,
    places: RwLock<Option<Vec<IndexedPlace>>>,
    memory_sizes: RwLock<Option<BTreeMap<u64, u64>>>,
    way_cells: RwLock<Option<HashMap<i64, u64>>>,
    tmc_cells: RwLock<Option<BTreeMap<u32, BTreeSet<u64>>>>,
    /// Built from `places` on the first spatial query, dropped by `index()`
    place_tree: RwLock<Option<RTree<PlacePoint>>>,
}

impl std::fmt::Debug for WorldGraphIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGraphIndex")
            .field("source", &self.source)
            .field("loaded_fields", &self.loaded_fields())
            .finish()
    }
}

impl WorldGraphIndex {
    /// Empty index with nothing persisted
    pub fn create() -> Self {
        Self::with_source(IndexSource::Fresh)
    }

    /// Validate the archive at `path` without decoding any field
    pub fn open(path: &Path) -> Result<Self> {
        let archive = Archive::open(path, ArchiveMode::Read).map_err(version_error)?;
        match archive.get_metadata(INDEX_VERSION_KEY)? {
            Some(version) if version == INDEX_FORMAT_VERSION => {}
            found => {
                return Err(WorldGraphError::IndexVersionMismatch {
                    expected: INDEX_FORMAT_VERSION.to_string(),
                    found: found.unwrap_or_else(|| "none".to_string()),
                })
            }
        }
        debug!("Opened world graph index {:?}", path);
        Ok(Self::with_source(IndexSource::Archive(path.to_path_buf())))
    }

    fn with_source(source: IndexSource) -> Self {
        Self {
            source,
            places: RwLock::new(None),
            memory_sizes: RwLock::new(None),
            way_cells: RwLock::new(None),
            tmc_cells: RwLock::new(None),
            place_tree: RwLock::new(None),
        }
    }

    /// Archive this index was opened from, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            IndexSource::Fresh => None,
            IndexSource::Archive(path) => Some(path),
        }
    }

    // =========================================================================
    // Field loading
    // =========================================================================

    /// Make sure `field` is materialised
    pub fn load_field(&self, field: IndexField) -> Result<()> {
        match field {
            IndexField::Places => self.load_slot(&self.places, field),
            IndexField::CellMemorySizes => self.load_slot(&self.memory_sizes, field),
            IndexField::WayCells => self.load_slot(&self.way_cells, field),
            IndexField::TmcTableCells => self.load_slot(&self.tmc_cells, field),
        }
    }

    pub fn is_loaded(&self, field: IndexField) -> bool {
        match field {
            IndexField::Places => self.places.read().is_some(),
            IndexField::CellMemorySizes => self.memory_sizes.read().is_some(),
            IndexField::WayCells => self.way_cells.read().is_some(),
            IndexField::TmcTableCells => self.tmc_cells.read().is_some(),
        }
    }

    /// Fields decoded so far
    pub fn loaded_fields(&self) -> Vec<IndexField> {
        IndexField::ALL
            .into_iter()
            .filter(|field| self.is_loaded(*field))
            .collect()
    }

    fn load_all(&self) -> Result<()> {
        for field in IndexField::ALL {
            self.load_field(field)?;
        }
        Ok(())
    }

    fn load_slot<T>(&self, slot: &RwLock<Option<T>>, field: IndexField) -> Result<()>
    where
        T: DeserializeOwned + Default,
    {
        if slot.read().is_some() {
            return Ok(());
        }

        let mut guard = slot.write();
        // Double-check after acquiring the write lock
        if guard.is_some() {
            return Ok(());
        }

        let value = match &self.source {
            IndexSource::Fresh => T::default(),
            IndexSource::Archive(path) => {
                let archive = Archive::open(path, ArchiveMode::Read).map_err(version_error)?;
                archive.load_field(field.name())?.unwrap_or_default()
            }
        };
        debug!("Loaded index field '{}'", field);
        *guard = Some(value);
        Ok(())
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Merge one cell's graph into the index.
    ///
    /// Re-indexing a cell replaces its places and memory size. A way keeps
    /// the first cell it was indexed from.
    pub fn index(&self, cell: u64, graph: &CellGraph) -> Result<()> {
        self.load_all()?;

        {
            let mut places = self.places.write();
            let places = places.get_or_insert_with(Vec::new);
            places.retain(|p| p.cell != cell);
            places.extend(graph.places().iter().map(|place| IndexedPlace {
                cell,
                place: place.clone(),
            }));
            self.place_tree.write().take();
        }

        self.memory_sizes
            .write()
            .get_or_insert_with(BTreeMap::new)
            .insert(cell, graph.estimated_memory_size() as u64);

        {
            let mut way_cells = self.way_cells.write();
            let way_cells = way_cells.get_or_insert_with(HashMap::new);
            for way in graph.way_ids() {
                way_cells.entry(way).or_insert(cell);
            }
        }

        {
            let mut tmc_cells = self.tmc_cells.write();
            let tmc_cells = tmc_cells.get_or_insert_with(BTreeMap::new);
            for table in graph.tmc_tables() {
                tmc_cells.entry(table).or_default().insert(cell);
            }
        }

        Ok(())
    }

    /// Write every field to a fresh archive at `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        self.load_all()?;

        let tmp_path = path.with_extension("world.tmp");
        {
            let archive = Archive::open(&tmp_path, ArchiveMode::Create)?;
            archive.set_metadata(INDEX_VERSION_KEY, INDEX_FORMAT_VERSION)?;
            archive.save_field(IndexField::Places.name(), &*self.places.read())?;
            archive.save_field(IndexField::CellMemorySizes.name(), &*self.memory_sizes.read())?;
            archive.save_field(IndexField::WayCells.name(), &*self.way_cells.read())?;
            archive.save_field(IndexField::TmcTableCells.name(), &*self.tmc_cells.read())?;
        }
        std::fs::rename(&tmp_path, path)?;

        info!(
            "Saved world graph index to {:?} ({} places, {} ways)",
            path,
            self.places.read().as_ref().map_or(0, Vec::len),
            self.way_cells.read().as_ref().map_or(0, HashMap::len)
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Cell owning `way_id`; loads only the way map
    pub fn cell_for_way_identifier(&self, way_id: i64) -> Result<Option<u64>> {
        self.load_field(IndexField::WayCells)?;
        Ok(self
            .way_cells
            .read()
            .as_ref()
            .and_then(|ways| ways.get(&way_id).copied()))
    }

    /// Cells whose edges reference `table`
    pub fn cells_for_tmc_table(&self, table: u32) -> Result<BTreeSet<u64>> {
        self.load_field(IndexField::TmcTableCells)?;
        Ok(self
            .tmc_cells
            .read()
            .as_ref()
            .and_then(|tables| tables.get(&table).cloned())
            .unwrap_or_default())
    }

    /// Estimated in-memory size of a cell's graph when it was indexed
    pub fn memory_size(&self, cell: u64) -> Result<Option<u64>> {
        self.load_field(IndexField::CellMemorySizes)?;
        Ok(self
            .memory_sizes
            .read()
            .as_ref()
            .and_then(|sizes| sizes.get(&cell).copied()))
    }

    /// Nearest place to `location`
    pub fn place_for_location(&self, location: Location) -> Result<Option<IndexedPlace>> {
        self.with_place_tree(|places, tree| {
            tree.nearest_neighbor_iter(&location.as_point())
                .take(NEAREST_PLACE_CANDIDATES)
                .filter_map(|point| places.get(point.data))
                .min_by(|a, b| {
                    let da = location.distance_to(&a.place.location).as_meters();
                    let db = location.distance_to(&b.place.location).as_meters();
                    da.total_cmp(&db)
                })
                .cloned()
        })
    }

    /// Places inside `bounds`, ordered by name
    pub fn places_inside(&self, bounds: &Rectangle) -> Result<Vec<IndexedPlace>> {
        self.with_place_tree(|places, tree| {
            let mut inside: Vec<IndexedPlace> = tree
                .locate_in_envelope(&bounds.as_envelope())
                .filter_map(|point| places.get(point.data).cloned())
                .collect();
            inside.sort_by(|a, b| a.place.name.cmp(&b.place.name));
            inside
        })
    }

    /// Run `query` against the place list and its R-tree, building the tree
    /// if needed. The place list stays read-locked throughout, so `index()`
    /// cannot invalidate the tree underneath the query.
    fn with_place_tree<R>(
        &self,
        query: impl FnOnce(&[IndexedPlace], &RTree<PlacePoint>) -> R,
    ) -> Result<R> {
        self.load_field(IndexField::Places)?;
        let places = self.places.read();
        let places: &[IndexedPlace] = places.as_deref().unwrap_or_default();

        if self.place_tree.read().is_none() {
            let mut tree = self.place_tree.write();
            if tree.is_none() {
                let points = places
                    .iter()
                    .enumerate()
                    .map(|(pos, p)| GeomWithData::new(p.place.location.as_point(), pos))
                    .collect();
                *tree = Some(RTree::bulk_load(points));
                debug!("Built place tree over {} places", places.len());
            }
        }

        let tree = self.place_tree.read();
        match tree.as_ref() {
            Some(tree) => Ok(query(places, tree)),
            None => Ok(query(places, &RTree::new())),
        }
    }

    pub fn has_place_tree(&self) -> bool {
        self.place_tree.read().is_some()
    }

    pub fn way_count(&self) -> Result<usize> {
        self.load_field(IndexField::WayCells)?;
        Ok(self.way_cells.read().as_ref().map_or(0, HashMap::len))
    }

    pub fn place_count(&self) -> Result<usize> {
        self.load_field(IndexField::Places)?;
        Ok(self.places.read().as_ref().map_or(0, Vec::len))
    }
}

impl Default for WorldGraphIndex {
    fn default() -> Self {
        Self::create()
    }
}

fn version_error(error: StoreError) -> WorldGraphError {
    match error {
        StoreError::SchemaVersionMismatch { expected, found } => {
            WorldGraphError::IndexVersionMismatch { expected, found }
        }
        other => WorldGraphError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Vertex};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn place(name: &str, lat: f64, lon: f64) -> Place {
        Place {
            name: name.to_string(),
            location: Location::new(lat, lon),
            population: None,
            place_type: "town".to_string(),
        }
    }

    fn road_graph(ways: &[i64], tmc: Option<u32>, places: &[Place]) -> CellGraph {
        let mut graph = CellGraph::new();
        for (i, way) in ways.iter().enumerate() {
            let a = (i as i64) * 2;
            graph.add_vertex(Vertex {
                id: a,
                location: Location::new(0.1, 0.1 * i as f64),
            });
            graph.add_vertex(Vertex {
                id: a + 1,
                location: Location::new(0.2, 0.1 * i as f64),
            });
            graph.add_edge(
                a,
                a + 1,
                Edge {
                    way_id: *way,
                    segment: 0,
                    reverse: false,
                    length_meters: 10.0,
                    road_name: None,
                    tmc_table: tmc,
                },
            );
        }
        for p in places {
            graph.add_place(p.clone());
        }
        graph
    }

    #[test]
    fn test_fresh_index_queries() {
        let index = WorldGraphIndex::create();
        index
            .index(7, &road_graph(&[1, 2], Some(40), &[place("Alpha", 0.5, 0.5)]))
            .unwrap();
        index.index(8, &road_graph(&[2, 3], Some(40), &[])).unwrap();

        assert_eq!(index.cell_for_way_identifier(1).unwrap(), Some(7));
        // First writer wins for shared ways
        assert_eq!(index.cell_for_way_identifier(2).unwrap(), Some(7));
        assert_eq!(index.cell_for_way_identifier(3).unwrap(), Some(8));
        assert_eq!(index.cell_for_way_identifier(99).unwrap(), None);
        assert_eq!(
            index.cells_for_tmc_table(40).unwrap(),
            [7, 8].into_iter().collect()
        );
        assert!(index.cells_for_tmc_table(41).unwrap().is_empty());
        assert!(index.memory_size(7).unwrap().unwrap() > 0);
        assert_eq!(index.memory_size(9).unwrap(), None);
    }

    #[test]
    fn test_reindex_replaces_places() {
        let index = WorldGraphIndex::create();
        index
            .index(1, &road_graph(&[], None, &[place("Old", 1.0, 1.0)]))
            .unwrap();
        assert_eq!(index.place_count().unwrap(), 1);
        assert!(index.place_for_location(Location::new(1.0, 1.0)).unwrap().is_some());
        assert!(index.has_place_tree());

        index
            .index(1, &road_graph(&[], None, &[place("New", 1.0, 1.0)]))
            .unwrap();
        assert!(!index.has_place_tree());
        let nearest = index
            .place_for_location(Location::new(1.0, 1.0))
            .unwrap()
            .unwrap();
        assert_eq!(nearest.place.name, "New");
        assert_eq!(index.place_count().unwrap(), 1);
    }

    #[test]
    fn test_place_queries() {
        let index = WorldGraphIndex::create();
        index
            .index(
                1,
                &road_graph(
                    &[],
                    None,
                    &[
                        place("Charlie", 10.0, 10.0),
                        place("Alpha", 0.0, 0.0),
                        place("Bravo", 0.5, 0.5),
                    ],
                ),
            )
            .unwrap();

        let nearest = index
            .place_for_location(Location::new(9.0, 9.5))
            .unwrap()
            .unwrap();
        assert_eq!(nearest.place.name, "Charlie");

        let names: Vec<_> = index
            .places_inside(&Rectangle::from_corners(
                Location::new(-1.0, -1.0),
                Location::new(1.0, 1.0),
            ))
            .unwrap()
            .into_iter()
            .map(|p| p.place.name)
            .collect();
        assert_eq!(names, vec!["Alpha".to_string(), "Bravo".to_string()]);
    }

    #[test]
    fn test_empty_index_queries() {
        let index = WorldGraphIndex::create();
        assert_eq!(index.place_for_location(Location::ORIGIN).unwrap(), None);
        assert!(index.places_inside(&Rectangle::WORLD).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_open_loads_fields_lazily() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.world");
        {
            let index = WorldGraphIndex::create();
            index
                .index(5, &road_graph(&[10, 11], Some(3), &[place("Alpha", 0.5, 0.5)]))
                .unwrap();
            index.save(&path).unwrap();
        }

        let index = WorldGraphIndex::open(&path).unwrap();
        assert!(index.loaded_fields().is_empty());

        assert_eq!(index.cell_for_way_identifier(11).unwrap(), Some(5));
        assert_eq!(index.loaded_fields(), vec![IndexField::WayCells]);

        assert_eq!(index.cells_for_tmc_table(3).unwrap().len(), 1);
        assert!(!index.is_loaded(IndexField::Places));
    }

    #[test]
    fn test_open_rejects_other_index_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.world");
        WorldGraphIndex::create().save(&path).unwrap();
        {
            let archive = Archive::open(&path, ArchiveMode::Read).unwrap();
            archive.set_metadata(INDEX_VERSION_KEY, "0.1").unwrap();
        }

        let result = WorldGraphIndex::open(&path);
        assert!(matches!(
            result,
            Err(WorldGraphError::IndexVersionMismatch { ref found, .. }) if found == "0.1"
        ));
    }

    #[test]
    fn test_open_missing_index() {
        let temp = TempDir::new().unwrap();
        let result = WorldGraphIndex::open(&temp.path().join("index.world"));
        assert!(matches!(
            result,
            Err(WorldGraphError::Store(StoreError::Missing(_)))
        ));
    }

    #[test]
    fn test_field_names() {
        let names: Vec<_> = IndexField::ALL.iter().map(IndexField::name).collect();
        assert_eq!(
            names,
            vec!["places", "cell_memory_sizes", "way_cells", "tmc_table_cells"]
        );
    }
}
