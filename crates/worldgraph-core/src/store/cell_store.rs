//! SQLite Cell Graph Storage
//!
//! One database per populated cell. A cell file is written once during
//! extraction into a temporary sibling and renamed into place, so a reader
//! never observes a half-written graph.

use crate::geography::Location;
use crate::graph::{CellGraph, Edge, Place, Relation, RestrictionKind, Vertex};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::schema::{
    CELL_SCHEMA_VERSION, EDGE_COLUMNS, PLACE_COLUMNS, RELATION_COLUMNS,
    SCHEMA_CREATE_EDGES, SCHEMA_CREATE_GRAPH_METADATA, SCHEMA_CREATE_INDEXES,
    SCHEMA_CREATE_PLACES, SCHEMA_CREATE_RELATIONS, SCHEMA_CREATE_VERTICES, VERTEX_COLUMNS,
};
use super::{configure_connection, StoreError};

/// Edge row as stored: endpoints are vertex ids, not graph indices
struct EdgeRow {
    source: i64,
    target: i64,
    edge: Edge,
}

/// Relation row before its kind has been validated
struct RelationRow {
    id: i64,
    kind: String,
    from_way: i64,
    via_node: Option<i64>,
    to_way: i64,
}

/// A connection to one cell graph database
pub struct CellStore {
    conn: Connection,
    path: PathBuf,
}

impl CellStore {
    /// Open an existing cell database.
    ///
    /// A missing file is reported as [`StoreError::Missing`] rather than
    /// silently creating an empty database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn, false)?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };

        match store.get_metadata("schema_version")? {
            Some(version) if version == CELL_SCHEMA_VERSION => Ok(store),
            Some(version) => Err(StoreError::SchemaVersionMismatch {
                expected: CELL_SCHEMA_VERSION.to_string(),
                found: version,
            }),
            None => Err(StoreError::corrupt(path, "missing schema_version")),
        }
    }

    /// Create a new cell database with schema, replacing any existing file
    pub fn create(path: &Path, cell_name: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn, true)?;
        Self::create_schema(&conn)?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.set_metadata("schema_version", CELL_SCHEMA_VERSION)?;
        store.set_metadata("cell", cell_name)?;
        Ok(store)
    }

    /// Create an in-memory cell database (for testing)
    pub fn in_memory(cell_name: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;

        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.set_metadata("schema_version", CELL_SCHEMA_VERSION)?;
        store.set_metadata("cell", cell_name)?;
        Ok(store)
    }

    fn create_schema(conn: &Connection) -> SqliteResult<()> {
        conn.execute(SCHEMA_CREATE_VERTICES, [])?;
        conn.execute(SCHEMA_CREATE_EDGES, [])?;
        conn.execute(SCHEMA_CREATE_RELATIONS, [])?;
        conn.execute(SCHEMA_CREATE_PLACES, [])?;
        conn.execute(SCHEMA_CREATE_GRAPH_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Whole-graph Operations
    // =========================================================================

    /// Persist `graph` to `path` under `cell_name`.
    ///
    /// Writes to `<path>.tmp` first and renames on success.
    pub fn save_graph(path: &Path, cell_name: &str, graph: &CellGraph) -> Result<(), StoreError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let store = Self::create(&tmp, cell_name)?;
            store.write_graph(graph)?;
        }
        std::fs::rename(&tmp, path)?;
        debug!(
            "Saved {} ({} vertices, {} edges) to {:?}",
            cell_name,
            graph.vertex_count(),
            graph.edge_count(),
            path
        );
        Ok(())
    }

    /// Load the graph stored at `path`.
    pub fn load_graph(path: &Path) -> Result<CellGraph, StoreError> {
        Self::open(path)?.read_graph()
    }

    /// Insert every element of `graph` in a single transaction
    pub fn write_graph(&self, graph: &CellGraph) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO vertices (id, latitude, longitude) VALUES (?1, ?2, ?3)",
            )?;
            for (_, vertex) in graph.vertices() {
                stmt.execute(params![
                    vertex.id,
                    vertex.location.latitude,
                    vertex.location.longitude
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO edges
                    (way_id, segment, reverse, source, target, length_meters, road_name, tmc_table)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for (idx, edge) in graph.edges() {
                let Some((from, to)) = graph.edge_endpoints(idx) else {
                    continue;
                };
                let (Some(source), Some(target)) = (graph.vertex(from), graph.vertex(to)) else {
                    continue;
                };
                stmt.execute(params![
                    edge.way_id,
                    edge.segment,
                    edge.reverse,
                    source.id,
                    target.id,
                    edge.length_meters,
                    edge.road_name,
                    edge.tmc_table,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO relations (id, kind, from_way, via_node, to_way)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (_, relation) in graph.relations() {
                stmt.execute(params![
                    relation.id,
                    relation.kind.as_str(),
                    relation.from_way,
                    relation.via_node,
                    relation.to_way,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO places (name, latitude, longitude, population, place_type)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for place in graph.places() {
                stmt.execute(params![
                    place.name,
                    place.location.latitude,
                    place.location.longitude,
                    place.population.map(|p| p as i64),
                    place.place_type,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Rebuild the full graph from the database
    pub fn read_graph(&self) -> Result<CellGraph, StoreError> {
        let mut graph = CellGraph::new();

        for vertex in self.query_all_vertices()? {
            graph.add_vertex(vertex);
        }

        for row in self.query_all_edges()? {
            let (way_id, segment) = (row.edge.way_id, row.edge.segment);
            if graph.add_edge(row.source, row.target, row.edge).is_none() {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!(
                        "edge {}/{} references an unknown vertex",
                        way_id, segment
                    ),
                ));
            }
        }

        for row in self.query_all_relations()? {
            let kind = RestrictionKind::parse(&row.kind).ok_or_else(|| {
                StoreError::corrupt(
                    &self.path,
                    format!("relation {} has unknown kind '{}'", row.id, row.kind),
                )
            })?;
            graph.add_relation(Relation {
                id: row.id,
                kind,
                from_way: row.from_way,
                via_node: row.via_node,
                to_way: row.to_way,
            });
        }

        for place in self.query_all_places()? {
            graph.add_place(place);
        }

        Ok(graph)
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM graph_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO graph_metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn query_all_vertices(&self) -> Result<Vec<Vertex>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM vertices ORDER BY id", VERTEX_COLUMNS))?;
        let vertices = stmt
            .query_map([], |row| {
                Ok(Vertex {
                    id: row.get(0)?,
                    location: Location::new(row.get(1)?, row.get(2)?),
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(vertices)
    }

    fn query_all_edges(&self) -> Result<Vec<EdgeRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM edges ORDER BY rowid", EDGE_COLUMNS))?;
        let edges = stmt
            .query_map([], Self::row_to_edge)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(edges)
    }

    fn query_all_relations(&self) -> Result<Vec<RelationRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM relations ORDER BY rowid",
            RELATION_COLUMNS
        ))?;
        let relations = stmt
            .query_map([], |row| {
                Ok(RelationRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    from_way: row.get(2)?,
                    via_node: row.get(3)?,
                    to_way: row.get(4)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(relations)
    }

    fn query_all_places(&self) -> Result<Vec<Place>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM places ORDER BY rowid", PLACE_COLUMNS))?;
        let places = stmt
            .query_map([], |row| {
                Ok(Place {
                    name: row.get(0)?,
                    location: Location::new(row.get(1)?, row.get(2)?),
                    population: row.get::<_, Option<i64>>(3)?.map(|p| p.max(0) as u64),
                    place_type: row.get(4)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(places)
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> SqliteResult<EdgeRow> {
        Ok(EdgeRow {
            source: row.get(3)?,
            target: row.get(4)?,
            edge: Edge {
                way_id: row.get(0)?,
                segment: row.get(1)?,
                reverse: row.get(2)?,
                length_meters: row.get(5)?,
                road_name: row.get(6)?,
                tmc_table: row.get(7)?,
            },
        })
    }

    fn count(&self, table: &str) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Row counts without materialising the graph
    pub fn stats(&self) -> Result<CellStoreStats, StoreError> {
        Ok(CellStoreStats {
            cell: self.get_metadata("cell")?.unwrap_or_default(),
            vertex_count: self.count("vertices")?,
            edge_count: self.count("edges")?,
            relation_count: self.count("relations")?,
            place_count: self.count("places")?,
        })
    }
}

/// Statistics about a stored cell graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellStoreStats {
    pub cell: String,
    pub vertex_count: usize,
    pub edge_count: usize,
    pub relation_count: usize,
    pub place_count: usize,
}
