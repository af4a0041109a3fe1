//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → open snapshots → load live file → Manager
//!
//! Daemon (startup.rs::run_daemon):
//!     metrics endpoint (optional) → drift watcher → signal loop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown.rs broadcast → background tasks exit
//!     SIGHUP → resync with the live file
//! ```
//!
//! # Design Decisions
//! - One-shot CLI commands use only `build_manager`; nothing runs in the
//!   background unless the daemon is started
//! - The daemon never edits the document; it only adopts drift, so stopping
//!   it cannot interrupt a commit made by a CLI invocation

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{DaemonSignal, SignalListener};
pub use startup::{build_manager, build_manager_with, run_daemon};
