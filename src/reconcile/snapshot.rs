//! Bounded, disk-backed history of prior live files.
//!
//! Each snapshot is one file, `snapshot-<sequence>-<unix seconds>.json`, in
//! the snapshot directory. Opening the store recovers whatever is there, so a
//! rollback target survives a manager restart. Sequence numbers only grow.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::reconcile::atomic::write_atomic;

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot recorded")]
    NotFound,

    #[error("snapshot storage failed at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SnapshotError {
    fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// An immutable prior version of the live file.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub bytes: Arc<[u8]>,
    pub path: PathBuf,
}

/// What `history` reports; bytes stay in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub sha256: String,
    pub path: PathBuf,
}

impl From<&Snapshot> for SnapshotInfo {
    fn from(s: &Snapshot) -> Self {
        Self {
            sequence: s.sequence,
            created_at: s.created_at,
            size_bytes: s.bytes.len(),
            sha256: hex::encode(Sha256::digest(&s.bytes)),
            path: s.path.clone(),
        }
    }
}

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    depth: usize,
    /// Oldest first.
    entries: VecDeque<Snapshot>,
    next_sequence: u64,
}

impl SnapshotStore {
    /// Open (creating if needed) the store in `dir`, keeping at most `depth`
    /// snapshots. A depth of 0 is raised to 1.
    pub fn open(dir: impl Into<PathBuf>, depth: usize) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        let depth = depth.max(1);
        fs::create_dir_all(&dir).map_err(|e| SnapshotError::storage(&dir, e))?;

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| SnapshotError::storage(&dir, e))? {
            let entry = entry.map_err(|e| SnapshotError::storage(&dir, e))?;
            let name = entry.file_name();
            let Some((sequence, unix)) = parse_name(&name.to_string_lossy()) else {
                continue;
            };
            let path = entry.path();
            match fs::read(&path) {
                Ok(bytes) => found.push(Snapshot {
                    sequence,
                    created_at: from_unix(unix),
                    bytes: bytes.into(),
                    path,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
                }
            }
        }
        found.sort_by_key(|s| s.sequence);

        let next_sequence = found.last().map(|s| s.sequence + 1).unwrap_or(1);
        let mut store = Self {
            dir,
            depth,
            entries: found.into(),
            next_sequence,
        };
        store.evict();

        tracing::info!(
            dir = %store.dir.display(),
            depth = store.depth,
            recovered = store.entries.len(),
            next_sequence = store.next_sequence,
            "Snapshot store opened"
        );
        Ok(store)
    }

    /// Record `bytes` as the newest snapshot and return its sequence number.
    /// Fails only when the bytes cannot be persisted.
    pub fn push(&mut self, bytes: &[u8]) -> Result<u64, SnapshotError> {
        let sequence = self.next_sequence;
        let created_at = Utc::now();
        let path = self.dir.join(format!(
            "{}{:020}-{}{}",
            PREFIX,
            sequence,
            created_at.timestamp(),
            SUFFIX
        ));

        write_atomic(&path, bytes).map_err(|e| SnapshotError::storage(&path, e))?;

        self.next_sequence += 1;
        self.entries.push_back(Snapshot {
            sequence,
            created_at,
            bytes: bytes.into(),
            path,
        });
        self.evict();

        tracing::debug!(sequence, size = bytes.len(), "Snapshot recorded");
        Ok(sequence)
    }

    pub fn latest(&self) -> Result<&Snapshot, SnapshotError> {
        self.entries.back().ok_or(SnapshotError::NotFound)
    }

    pub fn get(&self, sequence: u64) -> Result<&Snapshot, SnapshotError> {
        self.entries
            .iter()
            .find(|s| s.sequence == sequence)
            .ok_or(SnapshotError::NotFound)
    }

    /// Newest first.
    pub fn history(&self) -> Vec<SnapshotInfo> {
        self.entries.iter().rev().map(SnapshotInfo::from).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn evict(&mut self) {
        while self.entries.len() > self.depth {
            if let Some(old) = self.entries.pop_front() {
                if let Err(e) = fs::remove_file(&old.path) {
                    tracing::warn!(
                        sequence = old.sequence,
                        path = %old.path.display(),
                        error = %e,
                        "Failed to delete evicted snapshot"
                    );
                }
            }
        }
    }
}

fn parse_name(name: &str) -> Option<(u64, i64)> {
    let stem = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    let (sequence, unix) = stem.split_once('-')?;
    Some((sequence.parse().ok()?, unix.parse().ok()?))
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_on_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path(), 3).unwrap();
        assert!(matches!(store.latest(), Err(SnapshotError::NotFound)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_push_and_evict() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path(), 2).unwrap();

        assert_eq!(store.push(b"one").unwrap(), 1);
        assert_eq!(store.push(b"two").unwrap(), 2);
        assert_eq!(store.push(b"three").unwrap(), 3);

        assert_eq!(store.len(), 2);
        assert_eq!(&*store.latest().unwrap().bytes, b"three");
        assert!(store.get(1).is_err());

        let history = store.history();
        assert_eq!(history[0].sequence, 3);
        assert_eq!(history[1].sequence, 2);
        assert_eq!(history[1].size_bytes, 3);

        // evicted file is gone from disk
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_history_serializes_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path(), 2).unwrap();
        store.push(b"one").unwrap();

        let info = &store.history()[0];
        let json = serde_json::to_value(info).unwrap();
        let created_at: DateTime<Utc> = json["created_at"].as_str().unwrap().parse().unwrap();
        assert_eq!(created_at, info.created_at);
        assert_eq!(json["sequence"], 1);
    }

    #[test]
    fn test_recovers_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = SnapshotStore::open(dir.path(), 5).unwrap();
            store.push(b"a").unwrap();
            store.push(b"b").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut store = SnapshotStore::open(dir.path(), 5).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(&*store.latest().unwrap().bytes, b"b");
        assert_eq!(store.push(b"c").unwrap(), 3);
    }

    #[test]
    fn test_reopen_with_smaller_depth_trims() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = SnapshotStore::open(dir.path(), 5).unwrap();
            for bytes in [b"1", b"2", b"3", b"4"] {
                store.push(bytes).unwrap();
            }
        }
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.history()[1].sequence, 3);
    }

    #[test]
    fn test_zero_depth_is_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path(), 0).unwrap();
        store.push(b"x").unwrap();
        store.push(b"y").unwrap();
        assert_eq!(store.depth(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(
            parse_name("snapshot-00000000000000000042-1700000000.json"),
            Some((42, 1_700_000_000))
        );
        assert_eq!(parse_name("snapshot-x-1.json"), None);
        assert_eq!(parse_name(".snapshot-1-1.json.abc"), None);
    }
}
