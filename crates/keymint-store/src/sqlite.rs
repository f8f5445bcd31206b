//! SQLite store backend.
//!
//! One row per descriptor; the version column carries the CAS counter.
//! WAL mode keeps concurrent readers cheap, and the connection mutex
//! serializes writers within the process.

use crate::{Record, Store, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// A private in-memory database; handy in tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS keychains (
                descriptor TEXT PRIMARY KEY,
                version    INTEGER NOT NULL,
                meta       BLOB NOT NULL
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Store for SqliteStore {
    fn get(&self, descriptor: &str) -> Result<Record, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT version, meta FROM keychains WHERE descriptor = ?1",
            params![descriptor],
            |row| {
                Ok(Record {
                    version: row.get::<_, i64>(0)? as u64,
                    data: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(descriptor.to_string()))
    }

    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO keychains (descriptor, version, meta) VALUES (?1, 1, ?2)",
            params![descriptor, data],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(descriptor.to_string()));
        }
        Ok(())
    }

    fn put(
        &self,
        descriptor: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let updated = conn.execute(
            "UPDATE keychains SET version = version + 1, meta = ?1
             WHERE descriptor = ?2 AND version = ?3",
            params![data, descriptor, expected_version as i64],
        )?;
        if updated == 1 {
            return Ok(expected_version + 1);
        }

        // Distinguish a lost race from a missing record.
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM keychains WHERE descriptor = ?1)",
            params![descriptor],
            |row| row.get(0),
        )?;
        if exists {
            Err(StoreError::Conflict(descriptor.to_string()))
        } else {
            Err(StoreError::NotFound(descriptor.to_string()))
        }
    }

    fn delete(&self, descriptor: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM keychains WHERE descriptor = ?1",
            params![descriptor],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound(descriptor.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("keychains.db")).unwrap();

        store.create("acct-1", b"blob").unwrap();
        let record = store.get("acct-1").unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.data, b"blob");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keychains.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create("acct-1", b"persisted").unwrap();
            store.put("acct-1", b"persisted-v2", 1).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let record = store.get("acct-1").unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.data, b"persisted-v2");
    }

    #[test]
    fn create_refuses_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create("acct-1", b"a").unwrap();
        assert!(matches!(
            store.create("acct-1", b"b"),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn cas_semantics() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create("acct-1", b"v1").unwrap();
        assert_eq!(store.put("acct-1", b"v2", 1).unwrap(), 2);
        assert!(matches!(
            store.put("acct-1", b"stale", 1),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.put("ghost", b"x", 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.delete("nope"), Err(StoreError::NotFound(_))));
        store.create("acct-1", b"a").unwrap();
        store.delete("acct-1").unwrap();
        assert!(matches!(store.get("acct-1"), Err(StoreError::NotFound(_))));
    }
}
