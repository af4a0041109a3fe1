//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! manager.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ManagerConfig (validated, immutable)
//!     → lifecycle::startup wires every subsystem from it
//!
//! Live xray document on disk:
//!     watcher.rs detects a touch
//!     → reconciler resync compares the bytes with the committed digest
//!     → adopts the file if it drifted and still parses
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal files
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    LinksConfig, ManagerConfig, ObservabilityConfig, PathsConfig, ReadinessConfig,
    ServiceConfig, SnapshotConfig, ValidatorConfig, WriterConfig,
};
pub use watcher::{DriftEvent, DriftWatcher};
