//! Server statistics.

use serde::Serialize;

use crate::reconcile::Reconciler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_profiles: usize,
    pub inbounds: usize,
    /// Seconds since the unit last became active; absent when it is not.
    pub uptime_seconds: Option<u64>,
    pub last_snapshot_sequence: Option<u64>,
    pub service_active: bool,
}

/// Counts come from the committed document. Supervisor failures degrade to
/// "unknown" rather than failing the whole report.
pub async fn collect(reconciler: &Reconciler) -> Statistics {
    let document = reconciler.document();
    let controller = reconciler.controller();

    let service_active = match controller.status().await {
        Ok(status) => status.is_active(),
        Err(e) => {
            tracing::warn!(error = %e, "Service status unavailable");
            false
        }
    };
    let uptime_seconds = match controller.uptime().await {
        Ok(uptime) => uptime.map(|d| d.as_secs()),
        Err(e) => {
            tracing::warn!(error = %e, "Service uptime unavailable");
            None
        }
    };

    Statistics {
        total_profiles: document.client_count(),
        inbounds: document.inbounds.len(),
        uptime_seconds,
        last_snapshot_sequence: reconciler.last_snapshot_sequence(),
        service_active,
    }
}
