//! Service control subsystem.
//!
//! # Data Flow
//! ```text
//! Reconciler after a commit:
//!     → ServiceController::reload (systemd.rs → systemctl restart <unit>)
//!     → readiness.rs polls ServiceController::is_ready with backoff
//!     → Ready: commit confirmed │ NotReady: reconciler rolls back
//!
//! Operators (CLI):
//!     → start / stop / restart / status / logs
//! ```
//!
//! # Design Decisions
//! - Reload is never assumed synchronous with readiness; readiness is polled
//! - Every command runs through command.rs with a deadline
//! - The trait is the seam tests replace with a scripted fake

pub mod command;
pub mod readiness;
pub mod systemd;

use std::time::Duration;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use command::{CommandError, CommandOutput};
pub use readiness::{wait_until_ready, NotReady};
pub use systemd::SystemdController;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{action} of {unit} failed: {detail}")]
    Failed {
        action: &'static str,
        unit: String,
        detail: String,
    },

    #[error("unexpected supervisor output: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Command(CommandError::TimedOut { .. }))
    }
}

/// What the supervisor reports about the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub unit: String,
    /// `active`, `inactive`, `failed`, `activating`, ...
    pub active_state: String,
    pub sub_state: String,
    pub main_pid: Option<u32>,
}

impl ServiceStatus {
    pub fn is_active(&self) -> bool {
        self.active_state == "active"
    }
}

/// Start/stop/probe surface of the supervised process.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;

    async fn restart(&self) -> Result<(), ServiceError>;

    async fn status(&self) -> Result<ServiceStatus, ServiceError>;

    /// Ask the process to pick up the live file.
    async fn reload(&self) -> Result<(), ServiceError>;

    /// One readiness probe. Must return within `timeout`.
    async fn is_ready(&self, timeout: Duration) -> bool;

    /// Most recent log lines, oldest first.
    async fn logs(&self, lines: usize) -> Result<Vec<String>, ServiceError>;

    /// How long the unit has been active, if it is.
    async fn uptime(&self) -> Result<Option<Duration>, ServiceError>;
}
