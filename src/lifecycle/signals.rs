//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to daemon events
//!
//! SIGHUP does not restart xray; it asks the manager to re-read the live
//! file and adopt any out-of-band edit.

use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// SIGHUP.
    Resync,
    /// SIGTERM or SIGINT.
    Shutdown,
}

pub struct SignalListener {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalListener {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal. `None` once the handlers are gone.
    pub async fn recv(&mut self) -> Option<DaemonSignal> {
        let signal = tokio::select! {
            s = self.hangup.recv() => s.map(|_| DaemonSignal::Resync),
            s = self.terminate.recv() => s.map(|_| DaemonSignal::Shutdown),
            s = self.interrupt.recv() => s.map(|_| DaemonSignal::Shutdown),
        };
        if let Some(signal) = signal {
            tracing::info!(?signal, "Signal received");
        }
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_hangup_means_resync() {
        let mut listener = SignalListener::install().unwrap();
        let status = std::process::Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap();
        assert_eq!(signal, Some(DaemonSignal::Resync));
    }
}
