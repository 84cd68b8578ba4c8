//! # Store Errors

use thiserror::Error;

/// Errors from durable store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("Store I/O error: {message}")]
    Io { message: String },

    /// A persisted record could not be (de)serialized.
    #[error("Store serialization error for key {key}: {message}")]
    Serialization { key: String, message: String },

    /// The store mutex was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(err: &std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}
