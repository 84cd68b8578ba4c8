//! # Store Handle
//!
//! Cheaply cloneable, thread-safe wrapper every subsystem holds onto.
//! Adds the JSON convenience layer on top of the raw byte port, since
//! all persisted records in the loop are JSON.

use crate::error::StoreError;
use crate::memory::InMemoryStore;
use crate::port::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Shared handle to the durable store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn KeyValueStore>>>,
}

impl StoreHandle {
    /// Wrap any store adapter.
    #[must_use]
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Fresh in-memory store, for tests and ephemeral runs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryStore::new()))
    }

    /// Read raw bytes.
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.get(key.as_bytes())
    }

    /// Read and deserialize a JSON record.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.get_raw(key)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Serialize and write a JSON record.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.put(key.as_bytes(), &bytes)
    }

    /// Delete a record.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.delete(key.as_bytes())
    }

    /// Check existence of a record.
    pub fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.exists(key.as_bytes())
    }

    /// List `(key, bytes)` pairs under a string prefix. Keys that are
    /// not valid UTF-8 are skipped; the loop only ever writes string
    /// keys.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let entries = guard.prefix_scan(prefix.as_bytes())?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| String::from_utf8(k).ok().map(|k| (k, v)))
            .collect())
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}
