//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! apply(edit)
//!     → writer slot (one apply at a time, FIFO)
//!     → edit + invariant checks on the committed document
//!     → atomic.rs stages the candidate beside the live file
//!     → validator.rs runs `xray -test` on the staged file
//!     → snapshot.rs records the live bytes
//!     → rename over the live file, reload, poll readiness
//!     → ready: publish the new document │ not ready: restore the snapshot
//! ```
//!
//! # Design Decisions
//! - Readers get the committed document from an `ArcSwap`, never the slot
//! - The snapshot store lives inside the slot mutex, so only the writer
//!   touches it
//! - Restore of a backup is an ordinary apply of a whole-document edit

pub mod atomic;
pub mod reconciler;
pub mod snapshot;
pub mod validator;

pub use reconciler::{Commit, Reconciler, ReconcilerSettings};
pub use snapshot::{Snapshot, SnapshotError, SnapshotInfo, SnapshotStore};
pub use validator::{ValidationFailure, Validator, XrayValidator};
