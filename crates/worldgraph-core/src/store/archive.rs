//! Named-field archive
//!
//! An archive is a SQLite database holding independent, named JSON payloads.
//! Reading one field never decodes another, which is what lets the World
//! Graph Index load its way map without touching the place list.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::schema::{
    ARCHIVE_FORMAT_VERSION, SCHEMA_CREATE_ARCHIVE_FIELDS, SCHEMA_CREATE_ARCHIVE_METADATA,
};
use super::{configure_connection, StoreError};

/// How an archive is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Existing archive; the format version must match
    Read,
    /// Fresh archive; any existing file is replaced
    Create,
}

/// A connection to one field archive
pub struct Archive {
    conn: Connection,
    path: PathBuf,
}

impl Archive {
    /// Open the archive at `path` in the given mode
    pub fn open(path: &Path, mode: ArchiveMode) -> Result<Self, StoreError> {
        match mode {
            ArchiveMode::Read => Self::open_existing(path),
            ArchiveMode::Create => Self::create(path),
        }
    }

    fn open_existing(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn, false)?;
        let archive = Self {
            conn,
            path: path.to_path_buf(),
        };

        match archive.get_metadata("format_version")? {
            Some(version) if version == ARCHIVE_FORMAT_VERSION => Ok(archive),
            Some(version) => Err(StoreError::SchemaVersionMismatch {
                expected: ARCHIVE_FORMAT_VERSION.to_string(),
                found: version,
            }),
            None => Err(StoreError::corrupt(path, "missing format_version")),
        }
    }

    fn create(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn, true)?;
        Self::create_schema(&conn)?;

        let archive = Self {
            conn,
            path: path.to_path_buf(),
        };
        archive.set_metadata("format_version", ARCHIVE_FORMAT_VERSION)?;
        Ok(archive)
    }

    /// Create an in-memory archive (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        let archive = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        archive.set_metadata("format_version", ARCHIVE_FORMAT_VERSION)?;
        Ok(archive)
    }

    fn create_schema(conn: &Connection) -> SqliteResult<()> {
        conn.execute(SCHEMA_CREATE_ARCHIVE_FIELDS, [])?;
        conn.execute(SCHEMA_CREATE_ARCHIVE_METADATA, [])?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Field Operations
    // =========================================================================

    /// Decode one field, or `None` if it was never saved
    pub fn load_field<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM archive_fields WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => {
                trace!("Decoding field '{}' ({} bytes)", name, payload.len());
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    /// Encode and store one field, replacing any previous value
    pub fn save_field<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO archive_fields (name, payload) VALUES (?1, ?2)",
            params![name, payload],
        )?;
        Ok(())
    }

    pub fn has_field(&self, name: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM archive_fields WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Names of every stored field, sorted
    pub fn field_names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM archive_fields ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(names)
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM archive_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO archive_metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}
