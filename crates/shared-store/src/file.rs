//! File-backed store adapter.
//!
//! Persists the full key-value map to one binary file using
//! length-prefixed records, rewriting it atomically (temp file +
//! rename) on every mutation. Suitable for the small, bounded data set
//! the closed loop produces: current snapshots, a 5-deep backup window
//! per key, and capped event logs.

use crate::error::StoreError;
use crate::port::KeyValueStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Durable store writing to a single file.
pub struct FileStore {
    data: HashMap<Vec<u8>, Vec<u8>>,
    path: PathBuf,
}

impl FileStore {
    /// Open (or create) a store at `path`, loading any existing records.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = Self::load_from_file(&path).unwrap_or_default();

        if data.is_empty() {
            info!(path = %path.display(), "Storage file empty or not found");
        } else {
            info!(path = %path.display(), keys = data.len(), "Loaded storage file");
        }

        Self { data, path }
    }

    fn load_from_file(path: &Path) -> Option<HashMap<Vec<u8>, Vec<u8>>> {
        use std::io::Read;

        let mut file = std::fs::File::open(path).ok()?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).ok()?;

        // Record format: [key_len:u32][key][value_len:u32][value]...
        let mut data = HashMap::new();
        let mut cursor = 0;

        while cursor + 4 <= bytes.len() {
            let key_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().ok()?) as usize;
            cursor += 4;

            if cursor + key_len > bytes.len() {
                warn!(path = %path.display(), "Truncated record; ignoring file tail");
                break;
            }
            let key = bytes[cursor..cursor + key_len].to_vec();
            cursor += key_len;

            if cursor + 4 > bytes.len() {
                warn!(path = %path.display(), "Truncated record; ignoring file tail");
                break;
            }
            let value_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().ok()?) as usize;
            cursor += 4;

            if cursor + value_len > bytes.len() {
                warn!(path = %path.display(), "Truncated record; ignoring file tail");
                break;
            }
            let value = bytes[cursor..cursor + value_len].to_vec();
            cursor += value_len;

            data.insert(key, value);
        }

        Some(data)
    }

    fn save_to_file(&self) -> Result<(), StoreError> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(&e))?;
        }

        let mut bytes = Vec::new();
        for (key, value) in &self.data {
            bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
            bytes.extend_from_slice(key);
            bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
            bytes.extend_from_slice(value);
        }

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(|e| StoreError::io(&e))?;
        file.write_all(&bytes).map_err(|e| StoreError::io(&e))?;
        file.sync_all().map_err(|e| StoreError::io(&e))?;

        std::fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&e))?;

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        self.save_to_file()
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.data.remove(key);
        self.save_to_file()
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
