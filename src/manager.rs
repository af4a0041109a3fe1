//! The operations surface of the manager.
//!
//! Everything an operator or an outer request layer can do goes through
//! [`Manager`]. Mutations become edits applied by the [`Reconciler`];
//! reads are projections of its committed document.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::backup::{self, BackupReceipt, BackupSettings};
use crate::config::ManagerConfig;
use crate::document::{sanitize_label, AddClient, RemoveClient, SetTransport, TransportPatch};
use crate::error::{ManagerError, ManagerResult};
use crate::profiles::registry::{project_all, project_one};
use crate::profiles::{address, code, CodeFormat, LinkSettings, ProfileRegistry, ProfileView};
use crate::reconcile::{Commit, Reconciler, SnapshotInfo};
use crate::service::ServiceController;
use crate::system::{info, stats, Statistics, SystemInfo};

pub struct Manager {
    config: ManagerConfig,
    reconciler: Arc<Reconciler>,
    /// Built on first use: the public address may need a network lookup.
    registry: OnceCell<ProfileRegistry>,
    backup: BackupSettings,
}

impl Manager {
    pub fn new(config: ManagerConfig, reconciler: Arc<Reconciler>) -> Self {
        Self {
            backup: BackupSettings::from_config(&config),
            registry: OnceCell::new(),
            config,
            reconciler,
        }
    }

    /// Use `links` instead of resolving them from configuration.
    pub fn with_links(config: ManagerConfig, reconciler: Arc<Reconciler>, links: LinkSettings) -> Self {
        let registry = ProfileRegistry::new(reconciler.clone(), links);
        Self {
            backup: BackupSettings::from_config(&config),
            registry: OnceCell::new_with(Some(registry)),
            config,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn service(&self) -> &Arc<dyn ServiceController> {
        self.reconciler.controller()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    async fn registry(&self) -> ManagerResult<&ProfileRegistry> {
        self.registry
            .get_or_try_init(|| async {
                let links = &self.config.links;
                let server_address = address::resolve(links).await?;
                Ok::<_, ManagerError>(ProfileRegistry::new(
                    self.reconciler.clone(),
                    LinkSettings {
                        server_address,
                        public_key: links.reality_public_key.clone(),
                        fingerprint: links.fingerprint.clone(),
                    },
                ))
            })
            .await
    }

    pub async fn list_profiles(&self) -> ManagerResult<Vec<ProfileView>> {
        Ok(self.registry().await?.list())
    }

    pub async fn get_profile(&self, id: &Uuid) -> ManagerResult<ProfileView> {
        self.registry().await?.get(id)
    }

    pub async fn link_for(&self, id: &Uuid) -> ManagerResult<String> {
        self.registry().await?.link_for(id)
    }

    pub async fn connection_code(&self, id: &Uuid, format: CodeFormat) -> ManagerResult<String> {
        let link = self.link_for(id).await?;
        Ok(code::render(&link, format)?)
    }

    /// Add a client with a fresh identity. `port` picks the inbound; the
    /// first managed inbound is used when it is `None`.
    pub async fn create_profile(&self, label: &str, port: Option<u16>) -> ManagerResult<ProfileView> {
        let label = sanitize_label(label)?;
        // resolve links before committing so a lookup failure changes nothing
        let registry = self.registry().await?;
        let edit = AddClient {
            id: Uuid::new_v4(),
            label,
            port,
            reality_flow: self.config.links.reality_flow.clone(),
        };
        let commit = self.reconciler.apply(&edit).await?;
        project_one(&commit.document, &edit.id, registry.links())
    }

    pub async fn delete_profile(&self, id: &Uuid) -> ManagerResult<Commit> {
        self.reconciler.apply(&RemoveClient { id: *id }).await
    }

    /// Change an inbound's transport settings; returns its profiles with
    /// their new links.
    pub async fn set_transport(&self, port: u16, patch: TransportPatch) -> ManagerResult<Vec<ProfileView>> {
        let registry = self.registry().await?;
        let commit = self.reconciler.apply(&SetTransport { port, patch }).await?;
        Ok(project_all(&commit.document, registry.links())
            .into_iter()
            .filter(|p| p.port == port)
            .collect())
    }

    pub async fn create_backup(&self) -> ManagerResult<BackupReceipt> {
        let path = self.reconciler.config_path();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ManagerError::io("read live file", path, e))?;
        Ok(backup::export(&self.backup, &bytes)?)
    }

    /// Restore from a backup archive or a plain JSON file. Goes through the
    /// normal apply path, so a bad backup is rejected or rolled back.
    pub async fn restore_backup(&self, path: &Path) -> ManagerResult<Commit> {
        let bytes = backup::read_config(path)?;
        tracing::info!(source = %path.display(), "Restoring configuration from backup");
        self.reconciler.restore(&bytes).await
    }

    pub fn snapshot_history(&self) -> Vec<SnapshotInfo> {
        self.reconciler.snapshot_history()
    }

    pub async fn statistics(&self) -> Statistics {
        stats::collect(&self.reconciler).await
    }

    pub async fn system_info(&self) -> SystemInfo {
        info::collect(
            &self.config.validator.binary,
            Duration::from_secs(self.config.validator.timeout_secs),
            &self.reconciler.document(),
        )
        .await
    }

    /// Validate the live file as it is on disk.
    pub async fn verify(&self) -> ManagerResult<()> {
        self.reconciler.verify_live().await
    }

    /// Adopt an out-of-band edit of the live file, if any.
    pub async fn resync(&self) -> ManagerResult<bool> {
        self.reconciler.resync().await
    }
}
