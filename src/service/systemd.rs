//! systemd-backed service controller.
//!
//! # Responsibilities
//! - Drive the unit through `systemctl` (start/stop/restart/show)
//! - Decide readiness: the unit is active with the same activation on two
//!   consecutive checks, and optionally accepts TCP on the inbound
//! - Read recent journal lines for diagnostics
//!
//! xray has no in-place reload, so `reload` restarts the unit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::ServiceConfig;
use crate::service::command::{self, CommandOutput};
use crate::service::{ServiceController, ServiceError, ServiceStatus};

pub struct SystemdController {
    unit: String,
    systemctl: PathBuf,
    journalctl: PathBuf,
    command_timeout: Duration,
    probe_address: Option<String>,
    /// Activation seen by the previous readiness check since the last
    /// start, restart or reload.
    last_activation: ArcSwapOption<Activation>,
}

/// One activation of the unit. systemd stamps a new one, with a new main
/// PID, every time the unit is (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Activation {
    entered_us: u64,
    main_pid: Option<u32>,
}

const ACTIVATION_PROPERTIES: &str = "ActiveState,SubState,MainPID,ActiveEnterTimestampMonotonic";

impl SystemdController {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            unit: config.unit.clone(),
            systemctl: config.systemctl.clone(),
            journalctl: config.journalctl.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            probe_address: config.probe_address.clone(),
            last_activation: ArcSwapOption::empty(),
        }
    }

    /// Record `current` and report whether it is the same activation the
    /// previous check saw. A unit that crashes and is restarted by systemd
    /// between two checks never settles.
    pub(crate) fn settle(&self, current: Option<Activation>) -> bool {
        let previous = self.last_activation.swap(current.map(Arc::new));
        match (previous, current) {
            (Some(previous), Some(current)) => *previous == current,
            _ => false,
        }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        Ok(command::run(self.systemctl.as_os_str(), args, self.command_timeout).await?)
    }

    async fn action(&self, action: &'static str) -> Result<(), ServiceError> {
        tracing::info!(unit = %self.unit, action, "Service action");
        self.last_activation.store(None);
        let out = self.systemctl(&[action, &self.unit]).await?;
        if out.success() {
            Ok(())
        } else {
            Err(ServiceError::Failed {
                action,
                unit: self.unit.clone(),
                detail: out.diagnostics(),
            })
        }
    }

    async fn show(&self, properties: &str) -> Result<String, ServiceError> {
        let property_arg = format!("--property={}", properties);
        let out = self.systemctl(&["show", &self.unit, &property_arg]).await?;
        if !out.success() {
            return Err(ServiceError::Failed {
                action: "show",
                unit: self.unit.clone(),
                detail: out.diagnostics(),
            });
        }
        Ok(out.stdout)
    }
}

/// Parse `systemctl show` output (`Key=Value` per line).
pub(crate) fn parse_status(unit: &str, output: &str) -> Result<ServiceStatus, ServiceError> {
    let mut active_state = None;
    let mut sub_state = None;
    let mut main_pid = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ActiveState" => active_state = Some(value.trim().to_string()),
            "SubState" => sub_state = Some(value.trim().to_string()),
            "MainPID" => main_pid = value.trim().parse::<u32>().ok().filter(|pid| *pid != 0),
            _ => {}
        }
    }

    let active_state = active_state
        .ok_or_else(|| ServiceError::Malformed(format!("no ActiveState in: {}", output.trim())))?;

    Ok(ServiceStatus {
        unit: unit.to_string(),
        active_state,
        sub_state: sub_state.unwrap_or_default(),
        main_pid,
    })
}

/// The unit's current activation, or `None` unless it is active.
pub(crate) fn parse_activation(output: &str) -> Option<Activation> {
    let status = parse_status("", output).ok()?;
    if !status.is_active() {
        return None;
    }
    let entered_us = output
        .lines()
        .find_map(|l| l.strip_prefix("ActiveEnterTimestampMonotonic="))?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|us| *us != 0)?;
    Some(Activation {
        entered_us,
        main_pid: status.main_pid,
    })
}

/// Seconds the unit has been active, from its monotonic activation stamp
/// (microseconds) and the host's monotonic uptime (`/proc/uptime`).
pub(crate) fn active_duration(enter_monotonic_us: &str, proc_uptime: &str) -> Option<Duration> {
    let entered_us: u64 = enter_monotonic_us.trim().parse().ok()?;
    if entered_us == 0 {
        return None;
    }
    let host_secs: f64 = proc_uptime.split_whitespace().next()?.parse().ok()?;
    let host_us = (host_secs * 1_000_000.0) as u64;
    Some(Duration::from_micros(host_us.saturating_sub(entered_us)))
}

#[async_trait]
impl ServiceController for SystemdController {
    async fn start(&self) -> Result<(), ServiceError> {
        self.action("start").await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.action("stop").await
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        self.action("restart").await
    }

    async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let out = self.show("ActiveState,SubState,MainPID").await?;
        parse_status(&self.unit, &out)
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        self.action("restart").await
    }

    async fn is_ready(&self, timeout: Duration) -> bool {
        let check = async {
            let current = match self.show(ACTIVATION_PROPERTIES).await {
                Ok(out) => parse_activation(&out),
                Err(e) => {
                    tracing::debug!(error = %e, "Cannot read unit activation");
                    None
                }
            };
            if !self.settle(current) {
                tracing::debug!(unit = %self.unit, ?current, "Unit has not settled");
                return false;
            }
            match &self.probe_address {
                Some(addr) => match TcpStream::connect(addr.as_str()).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(address = %addr, error = %e, "TCP connect refused");
                        false
                    }
                },
                None => true,
            }
        };
        tokio::time::timeout(timeout, check).await.unwrap_or(false)
    }

    async fn logs(&self, lines: usize) -> Result<Vec<String>, ServiceError> {
        let count = lines.to_string();
        let out = command::run(
            self.journalctl.as_os_str(),
            ["-u", self.unit.as_str(), "-n", count.as_str(), "--no-pager", "--output=short-iso"],
            self.command_timeout,
        )
        .await?;
        if !out.success() {
            return Err(ServiceError::Failed {
                action: "logs",
                unit: self.unit.clone(),
                detail: out.diagnostics(),
            });
        }
        Ok(out.stdout.lines().map(str::to_string).collect())
    }

    async fn uptime(&self) -> Result<Option<Duration>, ServiceError> {
        let out = self.show("ActiveEnterTimestampMonotonic").await?;
        let value = out
            .lines()
            .find_map(|l| l.strip_prefix("ActiveEnterTimestampMonotonic="))
            .ok_or_else(|| ServiceError::Malformed(out.trim().to_string()))?;
        let proc_uptime = match tokio::fs::read_to_string("/proc/uptime").await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "Cannot read /proc/uptime");
                return Ok(None);
            }
        };
        Ok(active_duration(value, &proc_uptime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = parse_status(
            "xray",
            "ActiveState=active\nSubState=running\nMainPID=4242\n",
        )
        .unwrap();
        assert!(status.is_active());
        assert_eq!(status.sub_state, "running");
        assert_eq!(status.main_pid, Some(4242));

        let stopped = parse_status("xray", "MainPID=0\nActiveState=inactive\nSubState=dead").unwrap();
        assert!(!stopped.is_active());
        assert_eq!(stopped.main_pid, None);
    }

    #[test]
    fn test_parse_status_requires_active_state() {
        assert!(matches!(
            parse_status("xray", "SubState=running"),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[test]
    fn test_active_duration() {
        // host up 1000.5s, unit entered active at 400s
        let d = active_duration("400000000", "1000.50 3900.12").unwrap();
        assert_eq!(d.as_secs(), 600);
        assert!(active_duration("0", "1000.50 3900.12").is_none());
        assert!(active_duration("garbage", "1000.50").is_none());
    }

    #[tokio::test]
    async fn test_actions_report_failures() {
        let config = ServiceConfig {
            systemctl: PathBuf::from("false"),
            ..ServiceConfig::default()
        };
        let controller = SystemdController::new(&config);
        match controller.restart().await {
            Err(ServiceError::Failed { action, unit, .. }) => {
                assert_eq!(action, "restart");
                assert_eq!(unit, "xray");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!controller.is_ready(Duration::from_secs(1)).await);
    }

    const RUNNING: &str =
        "ActiveState=active\nSubState=running\nMainPID=4242\nActiveEnterTimestampMonotonic=81234567\n";

    #[test]
    fn test_parse_activation() {
        let running = parse_activation(RUNNING).unwrap();
        assert_eq!(running.entered_us, 81234567);
        assert_eq!(running.main_pid, Some(4242));

        let failed = "ActiveState=failed\nSubState=failed\nMainPID=0\nActiveEnterTimestampMonotonic=81234567\n";
        assert!(parse_activation(failed).is_none());
        let never_entered = "ActiveState=active\nMainPID=4242\nActiveEnterTimestampMonotonic=0\n";
        assert!(parse_activation(never_entered).is_none());
        assert!(parse_activation("").is_none());
    }

    #[test]
    fn test_ready_only_once_activation_is_stable() {
        let controller = SystemdController::new(&ServiceConfig::default());
        let first = parse_activation(RUNNING);

        // the first sighting of an activation is never enough
        assert!(!controller.settle(first));
        assert!(controller.settle(first));
        assert!(controller.settle(first));
    }

    #[test]
    fn test_crash_restart_between_checks_is_not_ready() {
        let controller = SystemdController::new(&ServiceConfig::default());
        let first = parse_activation(RUNNING);
        let restarted = parse_activation(
            "ActiveState=active\nMainPID=4310\nActiveEnterTimestampMonotonic=81734000\n",
        );

        assert!(!controller.settle(first));
        assert!(!controller.settle(restarted));
        // down at the next check
        assert!(!controller.settle(None));
        assert!(!controller.settle(restarted));
        assert!(controller.settle(restarted));
    }

    #[tokio::test]
    async fn test_actions_forget_the_previous_activation() {
        let config = ServiceConfig {
            systemctl: PathBuf::from("true"),
            ..ServiceConfig::default()
        };
        let controller = SystemdController::new(&config);
        let running = parse_activation(RUNNING);
        assert!(!controller.settle(running));

        assert!(controller.reload().await.is_ok());
        assert!(!controller.settle(running));
    }

    #[tokio::test]
    async fn test_silent_supervisor_is_not_ready() {
        let config = ServiceConfig {
            systemctl: PathBuf::from("true"),
            ..ServiceConfig::default()
        };
        let controller = SystemdController::new(&config);
        assert!(!controller.is_ready(Duration::from_secs(1)).await);
        assert!(!controller.is_ready(Duration::from_secs(1)).await);
    }
}
