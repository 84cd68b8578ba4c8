//! # Key-Value Port
//!
//! The interface the host supplies for durable storage. Atomicity of a
//! single `put` is the adapter's responsibility.

use crate::error::StoreError;

/// Abstract interface for key-value storage.
///
/// Production: [`crate::FileStore`]. Testing: [`crate::InMemoryStore`].
pub trait KeyValueStore: Send {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Iterate over key-value pairs whose key starts with `prefix`.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}
