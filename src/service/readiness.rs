//! Readiness polling after a reload.

use std::time::Instant;
use thiserror::Error;

use crate::resilience::{with_deadline, RetryPolicy};
use crate::service::ServiceController;

/// The unit never reported ready within the policy.
#[derive(Debug, Clone, Error)]
#[error("not ready after {attempts} probe(s), last probe timed out: {timed_out}")]
pub struct NotReady {
    pub attempts: u32,
    /// The final probe hit its deadline rather than answering "no".
    pub timed_out: bool,
}

/// Probe until ready or the policy is exhausted. Returns the attempt count.
pub async fn wait_until_ready(
    controller: &dyn ServiceController,
    policy: &RetryPolicy,
) -> Result<u32, NotReady> {
    let started = Instant::now();
    let mut timed_out = false;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // The controller is asked to honour the deadline itself; the outer
        // bound catches one that does not.
        let probe = controller.is_ready(policy.attempt_timeout);
        let bound = policy.attempt_timeout + policy.attempt_timeout / 2;
        match with_deadline("readiness probe", bound, probe).await {
            Ok(true) => {
                tracing::debug!(attempt, elapsed = ?started.elapsed(), "Service ready");
                return Ok(attempt);
            }
            Ok(false) => {
                timed_out = false;
                tracing::debug!(attempt, "Service not ready yet");
            }
            Err(_) => {
                timed_out = true;
            }
        }
    }

    tracing::warn!(
        attempts = policy.max_attempts,
        elapsed = ?started.elapsed(),
        "Service did not become ready"
    );
    Err(NotReady {
        attempts: policy.max_attempts,
        timed_out,
    })
}
