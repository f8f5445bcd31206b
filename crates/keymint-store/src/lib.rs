//! Keymint store — keyed persistence for keychain records.
//!
//! A record is an opaque, self-describing byte blob (the engine stores
//! versioned JSON) addressed by a client-chosen descriptor string. The
//! contract is deliberately small:
//!
//! - `get` / `delete` — plain keyed access, `NotFound` when absent;
//! - `create` — atomic insert that refuses to overwrite;
//! - `put` — compare-and-swap on a per-record version counter, so
//!   concurrent read-modify-write cycles on the same descriptor
//!   serialize; losers observe [`StoreError::Conflict`] and retry.
//!
//! Two backends: [`MemoryStore`] for tests and single-process use, and
//! [`SqliteStore`] for durable deployments.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// A stored record together with its CAS version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Monotonic per-descriptor version; starts at 1 on create.
    pub version: u64,
    pub data: Vec<u8>,
}

/// Errors from store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No keychain record for descriptor: {0}")]
    NotFound(String),

    #[error("A keychain record already exists for descriptor: {0}")]
    AlreadyExists(String),

    #[error("Concurrent update beat us to descriptor: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// The capability set every backend provides.
pub trait Store: Send + Sync {
    /// Fetch the current record.
    fn get(&self, descriptor: &str) -> Result<Record, StoreError>;

    /// Insert a new record at version 1. Refuses to overwrite.
    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Replace the record if its version still equals
    /// `expected_version`; returns the new version. A mismatch means a
    /// concurrent writer won and the caller should reload and retry.
    fn put(&self, descriptor: &str, data: &[u8], expected_version: u64)
        -> Result<u64, StoreError>;

    /// Remove the record.
    fn delete(&self, descriptor: &str) -> Result<(), StoreError>;
}

impl<S: Store + ?Sized> Store for &S {
    fn get(&self, descriptor: &str) -> Result<Record, StoreError> {
        (**self).get(descriptor)
    }
    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError> {
        (**self).create(descriptor, data)
    }
    fn put(
        &self,
        descriptor: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        (**self).put(descriptor, data, expected_version)
    }
    fn delete(&self, descriptor: &str) -> Result<(), StoreError> {
        (**self).delete(descriptor)
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn get(&self, descriptor: &str) -> Result<Record, StoreError> {
        (**self).get(descriptor)
    }
    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError> {
        (**self).create(descriptor, data)
    }
    fn put(
        &self,
        descriptor: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        (**self).put(descriptor, data, expected_version)
    }
    fn delete(&self, descriptor: &str) -> Result<(), StoreError> {
        (**self).delete(descriptor)
    }
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn get(&self, descriptor: &str) -> Result<Record, StoreError> {
        (**self).get(descriptor)
    }
    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError> {
        (**self).create(descriptor, data)
    }
    fn put(
        &self,
        descriptor: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        (**self).put(descriptor, data, expected_version)
    }
    fn delete(&self, descriptor: &str) -> Result<(), StoreError> {
        (**self).delete(descriptor)
    }
}
