//! # Shared Store - Durable Key-Value Persistence
//!
//! The single shared resource of the closed loop. Every subsystem
//! persists JSON records through a [`StoreHandle`], each in its own key
//! namespace (`state_*`, `audit_trail`, `messageBus_data`,
//! `recoveryService_data`), so no two components ever write the same
//! key and no locking discipline beyond the handle's mutex is needed.
//!
//! Two adapters are provided:
//!
//! - [`InMemoryStore`] - testing and ephemeral runs
//! - [`FileStore`] - single-file durability with atomic replace-on-write

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod file;
pub mod handle;
pub mod memory;
pub mod port;

// Re-export main types
pub use error::StoreError;
pub use file::FileStore;
pub use handle::StoreHandle;
pub use memory::InMemoryStore;
pub use port::KeyValueStore;
