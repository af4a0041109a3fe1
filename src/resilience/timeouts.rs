//! Timeout enforcement.
//!
//! Every suspension point in the manager (validator run, service command,
//! readiness probe, writer-slot acquisition) goes through [`with_deadline`]
//! so an expiry is logged the same way everywhere and surfaces as a typed
//! value rather than a hang.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{operation} exceeded its {limit:?} deadline")]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Run `fut` to completion or until `limit` elapses.
pub async fn with_deadline<F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => Ok(output),
        Err(_) => {
            tracing::warn!(operation, limit = ?limit, "Deadline exceeded");
            Err(DeadlineExceeded { operation, limit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = with_deadline("noop", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reports_expiry() {
        let err = with_deadline("sleep", Duration::from_millis(10), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(err.operation, "sleep");
        assert!(err.to_string().contains("sleep exceeded"));
    }
}
