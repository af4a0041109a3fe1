//! Shared fixtures and fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use xray_manager::config::ManagerConfig;
use xray_manager::document::ConfigurationDocument;
use xray_manager::profiles::LinkSettings;
use xray_manager::reconcile::{
    Reconciler, ReconcilerSettings, SnapshotStore, ValidationFailure, Validator,
};
use xray_manager::resilience::RetryPolicy;
use xray_manager::service::{ServiceController, ServiceError, ServiceStatus};
use xray_manager::Manager;

pub const BOB: &str = "0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11";

/// One VLESS+REALITY inbound with one client, plus fields the manager does
/// not model.
pub const REALITY_CONFIG: &str = r#"{
  "log": { "loglevel": "warning" },
  "inbounds": [
    {
      "port": 443,
      "protocol": "vless",
      "tag": "reality-in",
      "settings": {
        "clients": [
          { "id": "0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11", "email": "bob", "flow": "xtls-rprx-vision" }
        ],
        "decryption": "none"
      },
      "streamSettings": {
        "network": "tcp",
        "security": "reality",
        "realitySettings": {
          "dest": "www.microsoft.com:443",
          "serverNames": ["www.microsoft.com"],
          "privateKey": "kPrivateKeyPlaceholder",
          "shortIds": ["6ba85179e30d4fc2"]
        }
      }
    },
    {
      "port": 8443,
      "protocol": "vless",
      "tag": "ws-in",
      "settings": { "clients": [], "decryption": "none" },
      "streamSettings": {
        "network": "ws",
        "security": "tls",
        "wsSettings": { "path": "/ws", "headers": { "Host": "cdn.example.com" } },
        "tlsSettings": { "serverName": "cdn.example.com" }
      }
    }
  ],
  "outbounds": [ { "protocol": "freedom", "tag": "direct" } ],
  "routing": { "domainStrategy": "AsIs", "rules": [] }
}"#;

/// The REALITY inbound next to inbounds the manager leaves alone: a
/// dokodemo-door API listener and a VLESS inbound over httpupgrade.
pub const MIXED_CONFIG: &str = r#"{
  "api": { "tag": "api", "services": ["HandlerService", "StatsService"] },
  "inbounds": [
    {
      "port": 10085,
      "listen": "127.0.0.1",
      "protocol": "dokodemo-door",
      "tag": "api",
      "settings": { "address": "127.0.0.1" }
    },
    {
      "port": 443,
      "protocol": "vless",
      "tag": "reality-in",
      "settings": {
        "clients": [
          { "id": "0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11", "email": "bob", "flow": "xtls-rprx-vision" }
        ],
        "decryption": "none"
      },
      "streamSettings": {
        "network": "tcp",
        "security": "reality",
        "realitySettings": {
          "dest": "www.microsoft.com:443",
          "serverNames": ["www.microsoft.com"],
          "privateKey": "kPrivateKeyPlaceholder",
          "shortIds": ["6ba85179e30d4fc2"]
        }
      }
    },
    {
      "port": 2053,
      "protocol": "vless",
      "tag": "upgrade-in",
      "settings": {
        "clients": [ { "id": "6d1c8f0a-9a5e-4b7b-8c55-2f4e0f3b7d20", "email": "erin" } ],
        "decryption": "none"
      },
      "streamSettings": { "network": "httpupgrade", "httpupgradeSettings": { "path": "/up" } }
    }
  ],
  "outbounds": [ { "protocol": "freedom", "tag": "direct" } ],
  "routing": { "rules": [ { "inboundTag": ["api"], "outboundTag": "api" } ] }
}"#;

/// Ordered record of collaborator calls, shared by the fakes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValidatorMode {
    /// Accept anything that parses.
    Accept = 0,
    /// Reject every candidate.
    Reject = 1,
    /// Never answer.
    Hang = 2,
    /// Accept after a short pause.
    Slow = 3,
}

pub struct FakeValidator {
    mode: AtomicU8,
    pub calls: AtomicU32,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    /// Notified whenever a check starts.
    pub entered: Notify,
    live_path: PathBuf,
    /// Live file bytes seen while each candidate was being checked.
    pub live_during_check: Mutex<Vec<Vec<u8>>>,
    log: EventLog,
}

impl FakeValidator {
    pub fn set_mode(&self, mode: ValidatorMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Validator for FakeValidator {
    async fn check(&self, candidate: &Path) -> Result<(), ValidationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log.push("validate");
        self.live_during_check
            .lock()
            .unwrap()
            .push(std::fs::read(&self.live_path).unwrap_or_default());
        self.entered.notify_one();

        let bytes = std::fs::read(candidate).map_err(|e| ValidationFailure::rejected(e.to_string()))?;
        match self.mode.load(Ordering::SeqCst) {
            1 => return Err(ValidationFailure::rejected("Failed to start: invalid port")),
            2 => std::future::pending::<()>().await,
            3 => tokio::time::sleep(Duration::from_millis(20)).await,
            _ => {}
        }
        ConfigurationDocument::from_slice(&bytes)
            .map(|_| ())
            .map_err(|e| ValidationFailure::rejected(e.to_string()))
    }
}

pub struct FakeController {
    /// Readiness after each upcoming reload; `true` once exhausted.
    readiness_plan: Mutex<VecDeque<bool>>,
    ready: Mutex<bool>,
    /// Upcoming reloads that fail outright.
    pub failing_reloads: AtomicU32,
    pub reloads: AtomicU32,
    live_path: PathBuf,
    snapshot_dir: PathBuf,
    /// (live bytes, snapshot file count) observed at each reload.
    pub seen_at_reload: Mutex<Vec<(Vec<u8>, usize)>>,
    log: EventLog,
}

impl FakeController {
    /// Readiness reported after each of the next reloads, in order.
    pub fn plan(&self, readiness: &[bool]) {
        *self.readiness_plan.lock().unwrap() = readiness.iter().copied().collect();
    }

    pub fn reloads(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceController for FakeController {
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        self.reload().await
    }

    async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus {
            unit: "xray".to_string(),
            active_state: "active".to_string(),
            sub_state: "running".to_string(),
            main_pid: Some(4242),
        })
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.log.push("reload");
        let snapshots = std::fs::read_dir(&self.snapshot_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        self.seen_at_reload
            .lock()
            .unwrap()
            .push((std::fs::read(&self.live_path).unwrap_or_default(), snapshots));

        let failing = self.failing_reloads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reloads.store(failing - 1, Ordering::SeqCst);
            *self.ready.lock().unwrap() = false;
            return Err(ServiceError::Failed {
                action: "restart",
                unit: "xray".to_string(),
                detail: "Job for xray.service failed".to_string(),
            });
        }
        let next = self.readiness_plan.lock().unwrap().pop_front().unwrap_or(true);
        *self.ready.lock().unwrap() = next;
        Ok(())
    }

    async fn is_ready(&self, _timeout: Duration) -> bool {
        self.log.push("probe");
        *self.ready.lock().unwrap()
    }

    async fn logs(&self, lines: usize) -> Result<Vec<String>, ServiceError> {
        Ok((0..lines).map(|i| format!("line {}", i)).collect())
    }

    async fn uptime(&self) -> Result<Option<Duration>, ServiceError> {
        Ok(Some(Duration::from_secs(90)))
    }
}

/// A manager over a temporary directory, wired to the fakes.
pub struct Harness {
    pub dir: TempDir,
    pub manager: Manager,
    pub validator: Arc<FakeValidator>,
    pub controller: Arc<FakeController>,
    pub log: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Adjust the configuration before the manager is built.
    pub fn with(tweak: impl FnOnce(&mut ManagerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ManagerConfig::default();
        config.paths.config_path = dir.path().join("config.json");
        config.paths.snapshot_dir = dir.path().join("snapshots");
        config.paths.backup_dir = dir.path().join("backups");
        config.service.unit_files = Vec::new();
        config.snapshots.depth = 3;
        config.writer.acquire_timeout_secs = 10;
        config.links.server_address = Some("203.0.113.7".to_string());
        tweak(&mut config);

        std::fs::write(&config.paths.config_path, REALITY_CONFIG).unwrap();

        let log = EventLog::default();
        let validator = Arc::new(FakeValidator {
            mode: AtomicU8::new(ValidatorMode::Accept as u8),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            entered: Notify::new(),
            live_path: config.paths.config_path.clone(),
            live_during_check: Mutex::new(Vec::new()),
            log: log.clone(),
        });
        let controller = Arc::new(FakeController {
            readiness_plan: Mutex::new(VecDeque::new()),
            ready: Mutex::new(true),
            failing_reloads: AtomicU32::new(0),
            reloads: AtomicU32::new(0),
            live_path: config.paths.config_path.clone(),
            snapshot_dir: config.paths.snapshot_dir.clone(),
            seen_at_reload: Mutex::new(Vec::new()),
            log: log.clone(),
        });

        let mut settings = ReconcilerSettings::from_config(&config);
        settings.readiness = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            attempt_timeout: Duration::from_millis(50),
        };
        let store = SnapshotStore::open(&config.paths.snapshot_dir, config.snapshots.depth).unwrap();
        let reconciler = Reconciler::new(settings, store, validator.clone(), controller.clone()).unwrap();

        let links = LinkSettings {
            server_address: "203.0.113.7".to_string(),
            public_key: Some("pUbLiCkEy".to_string()),
            fingerprint: "chrome".to_string(),
        };
        let manager = Manager::with_links(config, Arc::new(reconciler), links);

        Self {
            dir,
            manager,
            validator,
            controller,
            log,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.manager.reconciler().config_path().to_path_buf()
    }

    /// Swap the live file for `contents` and let the manager adopt it.
    pub async fn adopt(&self, contents: &str) {
        std::fs::write(self.config_path(), contents).unwrap();
        assert!(self.manager.resync().await.unwrap());
    }

    pub fn live_bytes(&self) -> Vec<u8> {
        std::fs::read(self.config_path()).unwrap()
    }

    /// Files in the live file's directory other than the live file itself.
    pub fn stray_files(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "config.json")
            .collect()
    }
}
