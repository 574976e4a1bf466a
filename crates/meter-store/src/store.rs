//! Main store implementation.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};
use crate::schema;

/// SQLite-based store for meter4 topology, readings and backup settings.
///
/// Operations are grouped by concern in sibling modules (`topology`,
/// `readings`, `keys`, `reconcile`), each adding an `impl Store` block.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_objects().unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meter4").join("data.db");

        let store = Store::open(&path).unwrap();
        drop(store);
        assert!(path.exists());

        // Reopening an existing database keeps its schema.
        let store = Store::open(&path).unwrap();
        assert!(store.list_sensors().unwrap().is_empty());
    }
}
