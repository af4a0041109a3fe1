//! Live document watcher for out-of-band edits.
//!
//! The live file is replaced by rename, which drops inode-level watches, so
//! the watcher observes the parent directory and filters on the file name.
//! Events only say "something touched the file"; the reconciler decides
//! whether the bytes actually drifted from what it committed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Signals that the live document may have changed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftEvent;

/// A watcher that monitors the live document for changes.
pub struct DriftWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<DriftEvent>,
}

impl DriftWatcher {
    /// Create a new DriftWatcher.
    ///
    /// Returns the watcher and a receiver for drift notifications.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DriftEvent>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (Self {
            path: path.to_path_buf(),
            update_tx,
        }, update_rx)
    }

    /// Start watching. Keep the returned handle alive for as long as events
    /// are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let directory = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let touches_live = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    let relevant = event.kind.is_modify()
                        || event.kind.is_create()
                        || event.kind.is_remove();
                    if touches_live && relevant {
                        tracing::debug!(kind = ?event.kind, "Live document touched");
                        let _ = tx.send(DriftEvent);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            }
        }, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Drift watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_writes_to_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("config.json");
        std::fs::write(&live, b"{}").unwrap();

        let (watcher, mut rx) = DriftWatcher::new(&live);
        let _handle = watcher.run().unwrap();

        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        std::fs::write(&live, b"{\"inbounds\": []}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no drift event")
            .unwrap();
        assert_eq!(event, DriftEvent);
    }
}
