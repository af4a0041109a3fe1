//! Crate-level error taxonomy.
//!
//! Every failure that can come out of [`crate::reconcile::Reconciler::apply`]
//! is one of these variants. Nothing partial escapes: by the time a caller
//! sees an error the live file is either untouched or restored.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::backup::ArchiveError;
use crate::profiles::{AddressError, CodeError};
use crate::service::ServiceError;

/// Errors surfaced by the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The external validator rejected the candidate document.
    #[error("candidate configuration rejected{}: {detail}", timeout_note(.timed_out))]
    Validation { detail: String, timed_out: bool },

    /// The edit would break a uniqueness invariant (port, identity, label).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The candidate was committed but the service never became ready.
    /// The live file has been restored from the snapshot named here.
    #[error(
        "service did not become ready{}, restored snapshot {restored_sequence}: {detail}",
        timeout_note(.timed_out)
    )]
    Reconciliation {
        detail: String,
        timed_out: bool,
        restored_sequence: u64,
        /// Set when the restore itself hit trouble; operator attention needed.
        rollback_error: Option<String>,
    },

    /// No safety net could be recorded; the apply was refused.
    #[error("snapshot store unavailable: {0}")]
    SnapshotExhausted(String),

    /// The edit is malformed or would leave the document unusable.
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Another apply held the writer slot for longer than allowed.
    #[error("writer slot busy for {waited:?}")]
    WriterBusy { waited: Duration },

    #[error("I/O error during {op} on {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration document is not valid JSON for this schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Code(#[from] CodeError),

    #[error(transparent)]
    Address(#[from] AddressError),

    /// The committing task died before reporting an outcome.
    #[error("commit task aborted: {0}")]
    CommitAborted(String),
}

fn timeout_note(timed_out: &bool) -> &'static str {
    if *timed_out {
        " (timed out)"
    } else {
        ""
    }
}

impl ManagerError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True when the failure was caused by an exceeded deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Validation { timed_out, .. } | Self::Reconciliation { timed_out, .. } => {
                *timed_out
            }
            Self::WriterBusy { .. } => true,
            _ => false,
        }
    }

    /// True when the recovery mechanism itself is compromised and an
    /// operator should be alerted.
    pub fn needs_operator(&self) -> bool {
        match self {
            Self::SnapshotExhausted(_) => true,
            Self::Reconciliation { rollback_error, .. } => rollback_error.is_some(),
            _ => false,
        }
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
