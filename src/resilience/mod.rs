//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an external collaborator (validator, systemctl, probe):
//!     → timeouts.rs (enforce a deadline on the call)
//!     → On not-ready: retries.rs (repeat within a bounded policy)
//!     → backoff.rs (jittered exponential delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Only readiness probes are retried; reloads and validations are not
//! - Retry policy is finite, so an apply always terminates

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::{with_deadline, DeadlineExceeded};
