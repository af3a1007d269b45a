//! SQLite Schema Definitions for Cell Graphs and the Field Archive
//!
//! Each populated cell is persisted as its own SQLite database
//! (`cell-<lat>-<lon>.graph`). The World Graph Index lives in a separate
//! archive database (`index.world`) that stores one named payload per field.

/// Schema version for cell graph databases
pub const CELL_SCHEMA_VERSION: &str = "1.1";

/// Format version for field archives
pub const ARCHIVE_FORMAT_VERSION: &str = "1.0";

/// SQL to create the vertices table
pub const SCHEMA_CREATE_VERTICES: &str = r#"
CREATE TABLE IF NOT EXISTS vertices (
    -- OSM node id
    id INTEGER PRIMARY KEY NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL
)
"#;

/// SQL to create the edges table
///
/// `source` and `target` reference `vertices.id`. Rows are keyed by their
/// implicit rowid; an edge's identity is its way, segment and direction.
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    way_id INTEGER NOT NULL,
    segment INTEGER NOT NULL,
    -- 1 when the edge runs against the way's node order
    reverse INTEGER NOT NULL,
    source INTEGER NOT NULL,
    target INTEGER NOT NULL,
    length_meters REAL NOT NULL,
    road_name TEXT,
    -- Historical-traffic table reference
    tmc_table INTEGER,

    UNIQUE(way_id, segment, reverse)
)
"#;

/// SQL to create the turn restriction table
pub const SCHEMA_CREATE_RELATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    from_way INTEGER NOT NULL,
    via_node INTEGER,
    to_way INTEGER NOT NULL,

    UNIQUE(id, from_way, to_way)
)
"#;

/// SQL to create the places table
pub const SCHEMA_CREATE_PLACES: &str = r#"
CREATE TABLE IF NOT EXISTS places (
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    population INTEGER,
    place_type TEXT NOT NULL
)
"#;

/// SQL to create indexes for cell graph queries
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_edges_way ON edges(way_id);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
CREATE INDEX IF NOT EXISTS idx_relations_from_way ON relations(from_way);
"#;

/// SQL to create the cell graph metadata table
pub const SCHEMA_CREATE_GRAPH_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL to create the archive field table
///
/// Every field is an independent row so a reader only decodes what it asks for.
pub const SCHEMA_CREATE_ARCHIVE_FIELDS: &str = r#"
CREATE TABLE IF NOT EXISTS archive_fields (
    name TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL
)
"#;

/// SQL to create the archive metadata table
pub const SCHEMA_CREATE_ARCHIVE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS archive_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// Column names for vertex queries (in order for row mapping)
pub const VERTEX_COLUMNS: &str = "id, latitude, longitude";

/// Column names for edge queries (in order for row mapping)
pub const EDGE_COLUMNS: &str =
    "way_id, segment, reverse, source, target, length_meters, road_name, tmc_table";

/// Column names for relation queries (in order for row mapping)
pub const RELATION_COLUMNS: &str = "id, kind, from_way, via_node, to_way";

/// Column names for place queries (in order for row mapping)
pub const PLACE_COLUMNS: &str = "name, latitude, longitude, population, place_type";
