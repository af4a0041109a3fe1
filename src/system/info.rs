//! Host and binary information.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::document::{ConfigurationDocument, ProtocolType};
use crate::service::command;

const KERNEL_RELEASE: &str = "/proc/sys/kernel/osrelease";
const CONGESTION_CONTROL: &str = "/proc/sys/net/ipv4/tcp_congestion_control";
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub xray_version: String,
    pub os: String,
    pub architecture: String,
    pub kernel: String,
    pub bbr_enabled: bool,
    /// Protocol of the first managed inbound.
    pub active_protocol: Option<ProtocolType>,
    pub manager_version: String,
}

pub async fn collect(xray_binary: &Path, timeout: Duration, document: &ConfigurationDocument) -> SystemInfo {
    let xray_version = match command::run(xray_binary.as_os_str(), ["version"], timeout).await {
        Ok(out) if out.success() => parse_xray_version(&out.stdout).unwrap_or_else(|| UNKNOWN.to_string()),
        Ok(out) => {
            tracing::warn!(detail = %out.diagnostics(), "xray version failed");
            UNKNOWN.to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "xray version failed");
            UNKNOWN.to_string()
        }
    };

    let kernel = tokio::fs::read_to_string(KERNEL_RELEASE)
        .await
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| UNKNOWN.to_string());

    let bbr_enabled = tokio::fs::read_to_string(CONGESTION_CONTROL)
        .await
        .map(|s| is_bbr(&s))
        .unwrap_or(false);

    SystemInfo {
        xray_version,
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        kernel,
        bbr_enabled,
        active_protocol: document.inbounds.iter().find_map(|i| i.protocol_type()),
        manager_version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// `Xray 1.8.24 (Xray, Penetrates Everything.) ...` → `1.8.24`.
pub(crate) fn parse_xray_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    let mut words = first.split_whitespace();
    let _name = words.next()?;
    words.next().map(str::to_string)
}

pub(crate) fn is_bbr(congestion_control: &str) -> bool {
    congestion_control.trim().contains("bbr")
}
