//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire the reconciler, validator and service controller from configuration
//! - Run the daemon: metrics endpoint, drift watcher, signal loop
//!
//! Any wiring error is fatal; the daemon never runs half-initialised.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{DriftEvent, DriftWatcher, ManagerConfig};
use crate::error::{ManagerError, ManagerResult};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{DaemonSignal, SignalListener};
use crate::manager::Manager;
use crate::observability::init_metrics;
use crate::reconcile::{Reconciler, ReconcilerSettings, SnapshotStore, Validator, XrayValidator};
use crate::service::{ServiceController, SystemdController};

/// Burst of watcher events coalesced into one resync.
const DRIFT_SETTLE: Duration = Duration::from_millis(250);

/// Build a manager backed by `xray -test` and systemd.
pub fn build_manager(config: ManagerConfig) -> ManagerResult<Manager> {
    let validator: Arc<dyn Validator> = Arc::new(XrayValidator::new(&config.validator));
    let controller: Arc<dyn ServiceController> = Arc::new(SystemdController::new(&config.service));
    build_manager_with(config, validator, controller)
}

/// Build a manager around the given collaborators.
pub fn build_manager_with(
    config: ManagerConfig,
    validator: Arc<dyn Validator>,
    controller: Arc<dyn ServiceController>,
) -> ManagerResult<Manager> {
    let snapshots = SnapshotStore::open(&config.paths.snapshot_dir, config.snapshots.depth)
        .map_err(|e| ManagerError::SnapshotExhausted(e.to_string()))?;
    let reconciler = Reconciler::new(
        ReconcilerSettings::from_config(&config),
        snapshots,
        validator,
        controller,
    )?;
    Ok(Manager::new(config, Arc::new(reconciler)))
}

/// Run until SIGTERM/SIGINT. SIGHUP and changes to the live file trigger a
/// resync.
pub async fn run_daemon(manager: Arc<Manager>) -> Result<(), Box<dyn std::error::Error>> {
    let observability = &manager.config().observability;
    if observability.metrics_enabled {
        match observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut signals = SignalListener::install()?;
    let shutdown = Shutdown::new();

    let (watcher, drift) = DriftWatcher::new(manager.reconciler().config_path());
    // Without the watcher, SIGHUP still resyncs.
    let _watch = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Drift watcher unavailable");
            None
        }
    };
    let drift_task = spawn_drift_loop(manager.clone(), drift, shutdown.clone());

    // Catch edits made while the manager was not running.
    resync(&manager).await;
    tracing::info!("Daemon running");

    while let Some(signal) = signals.recv().await {
        match signal {
            DaemonSignal::Resync => resync(&manager).await,
            DaemonSignal::Shutdown => break,
        }
    }

    shutdown.trigger();
    if let Err(e) = drift_task.await {
        tracing::warn!(error = %e, "Drift task ended abnormally");
    }
    tracing::info!("Daemon stopped");
    Ok(())
}

fn spawn_drift_loop(
    manager: Arc<Manager>,
    mut drift: mpsc::UnboundedReceiver<DriftEvent>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                event = drift.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // our own commits also touch the file; the digest check
                    // in resync tells them apart
                    tokio::time::sleep(DRIFT_SETTLE).await;
                    while drift.try_recv().is_ok() {}
                    if shutdown.is_triggered() {
                        break;
                    }
                    resync(&manager).await;
                }
            }
        }
        tracing::debug!("Drift loop stopped");
    })
}

async fn resync(manager: &Manager) {
    match manager.resync().await {
        Ok(true) => tracing::info!("Live file re-read after external change"),
        Ok(false) => {}
        Err(e) => tracing::error!(error = %e, "Resync failed"),
    }
}
