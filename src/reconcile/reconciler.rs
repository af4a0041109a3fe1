//! The single writer of the live configuration file.
//!
//! # Responsibilities
//! - Serialize every mutation behind one writer slot (FIFO)
//! - Validate candidates before they can become live
//! - Commit by snapshot + rename, then reload and confirm readiness
//! - Roll back to the latest snapshot when the service does not come up
//! - Serve the committed document to readers without touching the slot
//!
//! # Cancellation
//! Dropping an `apply` future while it waits for the slot, or while the
//! candidate is being validated, drops the staged file and changes nothing.
//! From the commit step on, the work runs on its own task that owns the slot,
//! so it always reaches a confirmed commit or a confirmed rollback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::ManagerConfig;
use crate::document::{ConfigurationDocument, Edit, ReplaceDocument};
use crate::error::{ManagerError, ManagerResult};
use crate::observability::metrics;
use crate::reconcile::atomic::{self, StagedFile};
use crate::reconcile::snapshot::{SnapshotInfo, SnapshotStore};
use crate::reconcile::validator::{ValidationFailure, Validator};
use crate::resilience::{with_deadline, RetryPolicy};
use crate::service::{wait_until_ready, ServiceController};

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub config_path: PathBuf,
    /// Upper bound on one validator run.
    pub validation_timeout: Duration,
    /// Upper bound on one reload request.
    pub reload_timeout: Duration,
    pub readiness: RetryPolicy,
    /// How long a queued apply waits for the writer slot.
    pub acquire_timeout: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            config_path: config.paths.config_path.clone(),
            validation_timeout: Duration::from_secs(config.validator.timeout_secs),
            reload_timeout: Duration::from_secs(config.service.command_timeout_secs),
            readiness: RetryPolicy::from(&config.readiness),
            acquire_timeout: Duration::from_secs(config.writer.acquire_timeout_secs),
        }
    }
}

/// Outcome of a successful apply.
#[derive(Debug, Clone)]
pub struct Commit {
    pub document: Arc<ConfigurationDocument>,
    /// Snapshot holding the file this commit replaced.
    pub snapshot_sequence: u64,
    pub elapsed: Duration,
}

/// The confirmed live document and the digest of the bytes it was read from
/// or written as.
#[derive(Debug)]
struct Committed {
    document: Arc<ConfigurationDocument>,
    digest: [u8; 32],
}

pub struct Reconciler {
    settings: ReconcilerSettings,
    validator: Arc<dyn Validator>,
    controller: Arc<dyn ServiceController>,
    slot: Arc<Mutex<SnapshotStore>>,
    committed: Arc<ArcSwap<Committed>>,
    history: Arc<ArcSwap<Vec<SnapshotInfo>>>,
}

impl Reconciler {
    /// Load the live file and take ownership of the snapshot store.
    pub fn new(
        settings: ReconcilerSettings,
        snapshots: SnapshotStore,
        validator: Arc<dyn Validator>,
        controller: Arc<dyn ServiceController>,
    ) -> ManagerResult<Self> {
        let bytes = std::fs::read(&settings.config_path)
            .map_err(|e| ManagerError::io("read live file", &settings.config_path, e))?;
        let document = ConfigurationDocument::from_slice(&bytes)?;
        if let Err(e) = document.check_invariants() {
            tracing::warn!(error = %e, "Live document breaks an invariant; edits will be refused until fixed");
        }

        tracing::info!(
            path = %settings.config_path.display(),
            inbounds = document.inbounds.len(),
            clients = document.client_count(),
            "Live configuration loaded"
        );
        metrics::record_profile_count(document.client_count());
        metrics::record_snapshot_count(snapshots.len());

        Ok(Self {
            history: Arc::new(ArcSwap::from_pointee(snapshots.history())),
            committed: Arc::new(ArcSwap::from_pointee(Committed {
                document: Arc::new(document),
                digest: digest(&bytes),
            })),
            slot: Arc::new(Mutex::new(snapshots)),
            settings,
            validator,
            controller,
        })
    }

    /// The last confirmed document. Never waits for the writer slot.
    pub fn document(&self) -> Arc<ConfigurationDocument> {
        self.committed.load().document.clone()
    }

    /// Newest first. Never waits for the writer slot.
    pub fn snapshot_history(&self) -> Vec<SnapshotInfo> {
        self.history.load().as_ref().clone()
    }

    pub fn last_snapshot_sequence(&self) -> Option<u64> {
        self.history.load().first().map(|s| s.sequence)
    }

    pub fn config_path(&self) -> &Path {
        &self.settings.config_path
    }

    pub fn controller(&self) -> &Arc<dyn ServiceController> {
        &self.controller
    }

    /// Apply `edit` to the committed document and make the result live.
    pub async fn apply(&self, edit: &dyn Edit) -> ManagerResult<Commit> {
        let started = Instant::now();
        let description = edit.describe();
        tracing::info!(edit = %description, "Apply requested");

        let result = self.apply_inner(edit, started).await;

        match &result {
            Ok(commit) => {
                tracing::info!(
                    edit = %description,
                    snapshot = commit.snapshot_sequence,
                    elapsed = ?commit.elapsed,
                    "Apply committed"
                );
                metrics::record_apply("committed", started);
            }
            Err(e) => {
                tracing::warn!(edit = %description, error = %e, "Apply failed");
                metrics::record_apply(outcome_label(e), started);
            }
        }
        result
    }

    /// Replace the whole document with `bytes` through the normal apply path.
    pub async fn restore(&self, bytes: &[u8]) -> ManagerResult<Commit> {
        let document = ConfigurationDocument::from_slice(bytes)?;
        self.apply(&ReplaceDocument(document)).await
    }

    /// Re-read the live file and adopt it if it changed outside the manager.
    /// Returns whether anything was adopted.
    pub async fn resync(&self) -> ManagerResult<bool> {
        let _slot = self.acquire().await?;

        let path = &self.settings.config_path;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ManagerError::io("read live file", path, e))?;
        let on_disk = digest(&bytes);
        if on_disk == self.committed.load().digest {
            tracing::debug!("Live file matches committed document");
            return Ok(false);
        }

        let document = match ConfigurationDocument::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Live file changed outside the manager and no longer parses; keeping the committed document"
                );
                return Err(e.into());
            }
        };
        if let Err(e) = document.check_invariants() {
            tracing::warn!(error = %e, "Adopted document breaks an invariant");
        }

        tracing::warn!(
            path = %path.display(),
            clients = document.client_count(),
            "Adopted external edit of the live file"
        );
        metrics::record_profile_count(document.client_count());
        self.committed.store(Arc::new(Committed {
            document: Arc::new(document),
            digest: on_disk,
        }));
        Ok(true)
    }

    /// Run the validator against the live file as it is now.
    pub async fn verify_live(&self) -> ManagerResult<()> {
        let path = &self.settings.config_path;
        run_validator(&*self.validator, path, self.settings.validation_timeout).await
    }

    async fn acquire(&self) -> ManagerResult<OwnedMutexGuard<SnapshotStore>> {
        let limit = self.settings.acquire_timeout;
        match with_deadline("writer slot", limit, self.slot.clone().lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(ManagerError::WriterBusy { waited: limit }),
        }
    }

    async fn apply_inner(&self, edit: &dyn Edit, started: Instant) -> ManagerResult<Commit> {
        let slot = self.acquire().await?;

        let current = self.document();
        let candidate = edit.apply(&current)?;
        candidate.check_invariants()?;
        let bytes = candidate.to_pretty_bytes()?;

        let path = &self.settings.config_path;
        let staged = atomic::stage(path, &bytes)
            .map_err(|e| ManagerError::io("stage candidate", path, e))?;

        run_validator(&*self.validator, staged.path(), self.settings.validation_timeout).await?;

        let job = CommitJob {
            store: slot,
            document: Arc::new(candidate),
            digest: digest(&bytes),
            settings: self.settings.clone(),
            controller: self.controller.clone(),
            committed: self.committed.clone(),
            history: self.history.clone(),
        };

        // Past this point the commit owns the slot and runs to completion
        // even if this future is dropped.
        let (document, snapshot_sequence) = tokio::spawn(job.run(staged))
            .await
            .map_err(|e| ManagerError::CommitAborted(e.to_string()))??;

        Ok(Commit {
            document,
            snapshot_sequence,
            elapsed: started.elapsed(),
        })
    }
}

async fn run_validator(validator: &dyn Validator, path: &Path, limit: Duration) -> ManagerResult<()> {
    match with_deadline("validation", limit, validator.check(path)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(failure)) => Err(failure.into()),
        Err(_) => Err(ValidationFailure::timed_out(limit).into()),
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

fn outcome_label(e: &ManagerError) -> &'static str {
    match e {
        ManagerError::Validation { .. } => "rejected",
        ManagerError::Conflict(_) | ManagerError::InvalidEdit(_) | ManagerError::NotFound(_) => {
            "refused"
        }
        ManagerError::Reconciliation { .. } => "rolled_back",
        ManagerError::WriterBusy { .. } => "busy",
        _ => "error",
    }
}

/// Everything the commit needs, owned, so it can outlive the caller.
struct CommitJob {
    store: OwnedMutexGuard<SnapshotStore>,
    document: Arc<ConfigurationDocument>,
    digest: [u8; 32],
    settings: ReconcilerSettings,
    controller: Arc<dyn ServiceController>,
    committed: Arc<ArcSwap<Committed>>,
    history: Arc<ArcSwap<Vec<SnapshotInfo>>>,
}

impl CommitJob {
    async fn run(mut self, staged: StagedFile) -> ManagerResult<(Arc<ConfigurationDocument>, u64)> {
        let path = self.settings.config_path.clone();

        let live = std::fs::read(&path).map_err(|e| ManagerError::io("read live file", &path, e))?;
        let sequence = self
            .store
            .push(&live)
            .map_err(|e| ManagerError::SnapshotExhausted(e.to_string()))?;
        self.publish_history();

        staged
            .commit()
            .map_err(|e| ManagerError::io("replace live file", &path, e))?;
        tracing::debug!(path = %path.display(), snapshot = sequence, "Candidate renamed over live file");

        match self.reload_and_confirm().await {
            Ok(attempts) => {
                tracing::debug!(attempts, "Service confirmed ready");
                metrics::record_profile_count(self.document.client_count());
                self.committed.store(Arc::new(Committed {
                    document: self.document.clone(),
                    digest: self.digest,
                }));
                Ok((self.document, sequence))
            }
            Err((detail, timed_out)) => Err(self.roll_back(detail, timed_out).await),
        }
    }

    /// Reload, then poll until ready. Err carries the detail and whether a
    /// deadline was the cause.
    async fn reload_and_confirm(&self) -> Result<u32, (String, bool)> {
        match with_deadline("reload", self.settings.reload_timeout, self.controller.reload()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err((format!("reload failed: {}", e), e.is_timeout())),
            Err(e) => return Err((e.to_string(), true)),
        }
        wait_until_ready(&*self.controller, &self.settings.readiness)
            .await
            .map_err(|e| (e.to_string(), e.timed_out))
    }

    async fn roll_back(&self, detail: String, timed_out: bool) -> ManagerError {
        metrics::record_rollback();
        let path = &self.settings.config_path;

        let snapshot = match self.store.latest() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "No snapshot to roll back to");
                return ManagerError::Reconciliation {
                    detail,
                    timed_out,
                    restored_sequence: 0,
                    rollback_error: Some(e.to_string()),
                };
            }
        };
        tracing::warn!(
            snapshot = snapshot.sequence,
            %detail,
            "Rolling back to previous configuration"
        );

        let mut rollback_error = None;
        if let Err(e) = atomic::write_atomic(path, &snapshot.bytes) {
            rollback_error = Some(format!("restoring {}: {}", path.display(), e));
        } else {
            match with_deadline("reload", self.settings.reload_timeout, self.controller.reload()).await {
                Ok(Ok(())) => {
                    if let Err(e) = wait_until_ready(&*self.controller, &self.settings.readiness).await {
                        rollback_error = Some(format!("restored configuration: {}", e));
                    }
                }
                Ok(Err(e)) => rollback_error = Some(format!("reload after restore failed: {}", e)),
                Err(e) => rollback_error = Some(e.to_string()),
            }
        }

        match &rollback_error {
            Some(problem) => tracing::error!(
                snapshot = snapshot.sequence,
                %problem,
                "Rollback incomplete; operator attention required"
            ),
            None => tracing::info!(snapshot = snapshot.sequence, "Rollback confirmed"),
        }

        ManagerError::Reconciliation {
            detail,
            timed_out,
            restored_sequence: snapshot.sequence,
            rollback_error,
        }
    }

    fn publish_history(&self) {
        metrics::record_snapshot_count(self.store.len());
        self.history.store(Arc::new(self.store.history()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::fixtures;
    use crate::document::{AddClient, RemoveClient};
    use crate::service::{ServiceError, ServiceStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use uuid::Uuid;

    struct Accept;

    #[async_trait]
    impl Validator for Accept {
        async fn check(&self, candidate: &Path) -> Result<(), ValidationFailure> {
            ConfigurationDocument::from_slice(&std::fs::read(candidate).unwrap())
                .map(|_| ())
                .map_err(|e| ValidationFailure::rejected(e.to_string()))
        }
    }

    struct Toggle {
        ready: AtomicBool,
        reloads: AtomicU32,
    }

    #[async_trait]
    impl ServiceController for Toggle {
        async fn start(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn restart(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn status(&self) -> Result<ServiceStatus, ServiceError> {
            Err(ServiceError::Malformed("unused".into()))
        }

        async fn reload(&self) -> Result<(), ServiceError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_ready(&self, _timeout: Duration) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn logs(&self, _lines: usize) -> Result<Vec<String>, ServiceError> {
            Ok(Vec::new())
        }

        async fn uptime(&self) -> Result<Option<Duration>, ServiceError> {
            Ok(None)
        }
    }

    fn setup(dir: &Path) -> (Reconciler, Arc<Toggle>) {
        let config_path = dir.join("config.json");
        std::fs::write(&config_path, fixtures::REALITY).unwrap();
        let settings = ReconcilerSettings {
            config_path,
            validation_timeout: Duration::from_secs(5),
            reload_timeout: Duration::from_secs(5),
            readiness: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
                attempt_timeout: Duration::from_millis(50),
            },
            acquire_timeout: Duration::from_secs(5),
        };
        let store = SnapshotStore::open(dir.join("snapshots"), 3).unwrap();
        let controller = Arc::new(Toggle {
            ready: AtomicBool::new(true),
            reloads: AtomicU32::new(0),
        });
        let reconciler = Reconciler::new(settings, store, Arc::new(Accept), controller.clone()).unwrap();
        (reconciler, controller)
    }

    fn add(label: &str) -> AddClient {
        AddClient {
            id: Uuid::new_v4(),
            label: label.to_string(),
            port: None,
            reality_flow: "xtls-rprx-vision".to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_commits_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, controller) = setup(dir.path());

        let commit = reconciler.apply(&add("alice")).await.unwrap();
        assert_eq!(commit.snapshot_sequence, 1);
        assert_eq!(commit.document.client_count(), 2);
        assert_eq!(reconciler.document().client_count(), 2);
        assert_eq!(controller.reloads.load(Ordering::SeqCst), 1);

        let on_disk = ConfigurationDocument::from_slice(
            &std::fs::read(reconciler.config_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(&on_disk, commit.document.as_ref());
        assert_eq!(reconciler.last_snapshot_sequence(), Some(1));
    }

    #[tokio::test]
    async fn test_rollback_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, controller) = setup(dir.path());
        let before = std::fs::read(reconciler.config_path()).unwrap();

        controller.ready.store(false, Ordering::SeqCst);
        let err = reconciler.apply(&add("alice")).await.unwrap_err();

        match err {
            ManagerError::Reconciliation { restored_sequence, rollback_error, .. } => {
                assert_eq!(restored_sequence, 1);
                // the restored service is still not ready in this scenario
                assert!(rollback_error.is_some());
            }
            other => panic!("expected reconciliation error, got {other}"),
        }
        assert_eq!(std::fs::read(reconciler.config_path()).unwrap(), before);
        assert_eq!(controller.reloads.load(Ordering::SeqCst), 2);
        assert_eq!(reconciler.document().client_count(), 1);
    }

    #[tokio::test]
    async fn test_edit_error_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, controller) = setup(dir.path());

        let err = reconciler
            .apply(&RemoveClient { id: Uuid::new_v4() })
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
        assert_eq!(controller.reloads.load(Ordering::SeqCst), 0);
        assert!(reconciler.snapshot_history().is_empty());
    }

    #[tokio::test]
    async fn test_resync_adopts_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, _controller) = setup(dir.path());
        assert!(!reconciler.resync().await.unwrap());

        let mut doc = (*reconciler.document()).clone();
        doc.inbounds[0].settings.clients.clear();
        std::fs::write(reconciler.config_path(), doc.to_pretty_bytes().unwrap()).unwrap();

        assert!(reconciler.resync().await.unwrap());
        assert_eq!(reconciler.document().client_count(), 0);
        assert!(!reconciler.resync().await.unwrap());
    }

    #[tokio::test]
    async fn test_resync_keeps_document_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, _controller) = setup(dir.path());
        std::fs::write(reconciler.config_path(), b"{ not json").unwrap();

        assert!(matches!(reconciler.resync().await, Err(ManagerError::Parse(_))));
        assert_eq!(reconciler.document().client_count(), 1);
    }
}
