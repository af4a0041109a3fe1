//! Metrics collection and exposition.
//!
//! # Metrics
//! - `xray_manager_apply_total` (counter): applies by outcome
//! - `xray_manager_apply_duration_seconds` (histogram): apply latency
//! - `xray_manager_rollbacks_total` (counter): rollbacks attempted
//! - `xray_manager_snapshots` (gauge): snapshots retained
//! - `xray_manager_profiles` (gauge): clients in the committed document
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Serve the Prometheus scrape endpoint on `addr`. Must be called from
/// within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// `outcome` is one of `committed`, `rejected`, `refused`, `rolled_back`,
/// `busy`, `error`.
pub fn record_apply(outcome: &'static str, started: Instant) {
    counter!("xray_manager_apply_total", "outcome" => outcome).increment(1);
    histogram!("xray_manager_apply_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_rollback() {
    counter!("xray_manager_rollbacks_total").increment(1);
}

pub fn record_snapshot_count(count: usize) {
    gauge!("xray_manager_snapshots").set(count as f64);
}

pub fn record_profile_count(count: usize) {
    gauge!("xray_manager_profiles").set(count as f64);
}
