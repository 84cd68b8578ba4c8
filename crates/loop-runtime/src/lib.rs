//! # StateLoop Runtime
//!
//! Entry point wiring for the closed loop. The components are built
//! once, in dependency order, and passed by handle - there is no
//! module-level global state:
//!
//! ```text
//! store ──→ audit trail ──→ state manager ──→ recovery service
//!   │            ↑               │                  │
//!   └────→ message bus ←─────────┴──────────────────┘
//!                │
//!            scheduler (plan source = state manager)
//! ```
//!
//! ## Modular Structure
//!
//! - `config` - runtime configuration (defaults + `SL_*` env overrides)
//! - `container` - dependency-injected component construction
//! - `wiring` - routes notable bus traffic into the audit trail

pub mod config;
pub mod container;
pub mod wiring;

pub use config::{RuntimeConfig, StorageBackend, StorageConfig};
pub use container::CoreContainer;
