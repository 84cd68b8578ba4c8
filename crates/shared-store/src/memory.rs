//! In-memory store adapter for tests and ephemeral runs.

use crate::error::StoreError;
use crate::port::KeyValueStore;
use std::collections::HashMap;

/// HashMap-backed store. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: HashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut entries: Vec<_> = self
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mut store = InMemoryStore::new();
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.exists(b"k").unwrap());

        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        assert!(!store.exists(b"k").unwrap());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let mut store = InMemoryStore::new();
        store.delete(b"nope").unwrap();
    }

    #[test]
    fn test_prefix_scan_is_sorted_and_filtered() {
        let mut store = InMemoryStore::new();
        store.put(b"state_plan_v2", b"2").unwrap();
        store.put(b"state_plan_v1", b"1").unwrap();
        store.put(b"audit_trail", b"x").unwrap();

        let hits = store.prefix_scan(b"state_plan_v").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, b"state_plan_v1".to_vec());
        assert_eq!(hits[1].0, b"state_plan_v2".to_vec());
    }
}
