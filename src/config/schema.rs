//! Configuration schema definitions.
//!
//! This module defines the manager's own settings file (TOML). It is not the
//! xray document the manager edits; that lives in [`crate::document`].
//! All types derive Serde traits and every field has a default, so a minimal
//! file only names what differs from a stock install.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the manager.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Where the live document, snapshots and backups live.
    pub paths: PathsConfig,

    /// External validator invocation.
    pub validator: ValidatorConfig,

    /// Supervised unit and the tools used to control it.
    pub service: ServiceConfig,

    /// Readiness polling after a reload.
    pub readiness: ReadinessConfig,

    /// Rollback history.
    pub snapshots: SnapshotConfig,

    /// Writer slot behaviour.
    pub writer: WriterConfig,

    /// Connection link parameters.
    pub links: LinksConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Live xray configuration file.
    pub config_path: PathBuf,

    /// Directory holding rollback snapshots.
    pub snapshot_dir: PathBuf,

    /// Directory receiving backup archives.
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/usr/local/etc/xray/config.json"),
            snapshot_dir: PathBuf::from("/var/lib/xray-manager/snapshots"),
            backup_dir: PathBuf::from("/var/backups/xray"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// xray binary.
    pub binary: PathBuf,

    /// Arguments placed before the candidate path.
    pub test_args: Vec<String>,

    /// Deadline for one validation run.
    pub timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/xray"),
            test_args: vec!["-test".to_string(), "-config".to_string()],
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// systemd unit name.
    pub unit: String,

    pub systemctl: PathBuf,

    pub journalctl: PathBuf,

    /// Deadline for any single service command.
    pub command_timeout_secs: u64,

    /// Optional `host:port` that must also accept TCP before the unit counts
    /// as ready. Without it, readiness rests on the unit keeping the same
    /// activation across two consecutive checks.
    pub probe_address: Option<String>,

    /// Unit files bundled into backups.
    pub unit_files: Vec<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit: "xray".to_string(),
            systemctl: PathBuf::from("systemctl"),
            journalctl: PathBuf::from("journalctl"),
            command_timeout_secs: 15,
            probe_address: None,
            unit_files: vec![PathBuf::from("/etc/systemd/system/xray.service")],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Checks before the reload is declared failed; at least 2.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Deadline for a single probe in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 2000,
            probe_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshots retained; the oldest is evicted on overflow. At least 1.
    pub depth: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { depth: 5 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WriterConfig {
    /// How long a queued apply waits for the writer slot.
    pub acquire_timeout_secs: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Public address put in links. Discovered on first use when unset.
    pub server_address: Option<String>,

    /// Plain-text endpoint returning the caller's public IP.
    pub address_lookup_url: String,

    pub lookup_timeout_secs: u64,

    /// REALITY public key matching the inbound's private key.
    pub reality_public_key: Option<String>,

    /// uTLS fingerprint advertised in TLS and REALITY links.
    pub fingerprint: String,

    /// Flow given to new clients on VLESS+REALITY inbounds.
    pub reality_flow: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            address_lookup_url: "https://api.ipify.org".to_string(),
            lookup_timeout_secs: 5,
            reality_public_key: None,
            fingerprint: "chrome".to_string(),
            reality_flow: "xtls-rprx-vision".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` for terminals, `json` for log shippers.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
