//! Candidate validation through the supervised process's own test mode.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::ValidatorConfig;
use crate::error::ManagerError;
use crate::service::command::{self, CommandError};

#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct ValidationFailure {
    pub detail: String,
    pub timed_out: bool,
}

impl ValidationFailure {
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self {
            detail: format!("validator did not answer within {:?}", after),
            timed_out: true,
        }
    }
}

impl From<ValidationFailure> for ManagerError {
    fn from(f: ValidationFailure) -> Self {
        ManagerError::Validation {
            detail: f.detail,
            timed_out: f.timed_out,
        }
    }
}

/// Authoritative check of a candidate file. Must not touch the live process.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn check(&self, candidate: &Path) -> Result<(), ValidationFailure>;
}

/// Runs `xray -test -config <candidate>`; a zero exit status means valid.
#[derive(Debug, Clone)]
pub struct XrayValidator {
    binary: PathBuf,
    test_args: Vec<String>,
    timeout: Duration,
}

impl XrayValidator {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            test_args: config.test_args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Validator for XrayValidator {
    async fn check(&self, candidate: &Path) -> Result<(), ValidationFailure> {
        let mut args: Vec<&OsStr> = self.test_args.iter().map(OsStr::new).collect();
        args.push(candidate.as_os_str());

        match command::run(self.binary.as_os_str(), args, self.timeout).await {
            Ok(out) if out.success() => {
                tracing::debug!(candidate = %candidate.display(), "Candidate accepted");
                Ok(())
            }
            Ok(out) => {
                let detail = out.diagnostics();
                tracing::warn!(candidate = %candidate.display(), %detail, "Candidate rejected");
                Err(ValidationFailure::rejected(detail))
            }
            Err(CommandError::TimedOut { after, .. }) => Err(ValidationFailure::timed_out(after)),
            Err(e) => Err(ValidationFailure::rejected(e.to_string())),
        }
    }
}
