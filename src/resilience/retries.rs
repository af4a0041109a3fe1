//! Bounded retry policy.
//!
//! Used for readiness polling after a reload: the probe is repeated up to
//! `max_attempts` times with jittered exponential backoff in between, and
//! each probe has its own deadline.

use std::time::Duration;

use crate::config::schema::ReadinessConfig;
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt. The first attempt runs at once.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt.saturating_sub(1), self.base_delay_ms, self.max_delay_ms)
    }
}

impl From<&ReadinessConfig> for RetryPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(2),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            attempt_timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}
