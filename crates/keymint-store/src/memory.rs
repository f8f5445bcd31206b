//! In-memory store backend.
//!
//! A mutex-guarded map, intended for tests and throwaway deployments.
//! Version counters still apply so the engine's CAS retry path behaves
//! identically to the durable backend.

use crate::{Record, Store, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, descriptor: &str) -> Result<Record, StoreError> {
        let records = self.records.lock().expect("store mutex poisoned");
        records
            .get(descriptor)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(descriptor.to_string()))
    }

    fn create(&self, descriptor: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(descriptor) {
            return Err(StoreError::AlreadyExists(descriptor.to_string()));
        }
        records.insert(
            descriptor.to_string(),
            Record {
                version: 1,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn put(
        &self,
        descriptor: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let record = records
            .get_mut(descriptor)
            .ok_or_else(|| StoreError::NotFound(descriptor.to_string()))?;
        if record.version != expected_version {
            return Err(StoreError::Conflict(descriptor.to_string()));
        }
        record.version += 1;
        record.data = data.to_vec();
        Ok(record.version)
    }

    fn delete(&self, descriptor: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        records
            .remove(descriptor)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(descriptor.to_string()))
    }
}
