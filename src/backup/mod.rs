//! Backup archives.
//!
//! # Data Flow
//! ```text
//! create:  live file bytes + unit files
//!              → tar.gz in memory (config.json, units/<name>)
//!              → written atomically to backup_dir/config_backup_<stamp>.tar.gz
//!              → receipt (path, size, sha256 of the config bytes)
//!
//! restore: archive or plain JSON
//!              → config bytes
//!              → Reconciler::restore (validate, snapshot, commit, reload)
//! ```
//!
//! Unit files are archived for the operator; restore only applies the config.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ManagerConfig;
use crate::reconcile::atomic::write_atomic;

const CONFIG_ENTRY: &str = "config.json";
const UNITS_DIR: &str = "units";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("backup I/O failed during {operation} on {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {} does not contain config.json", .path.display())]
    MissingConfig { path: PathBuf },
}

impl ArchiveError {
    fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub unit_files: Vec<PathBuf>,
}

impl BackupSettings {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            backup_dir: config.paths.backup_dir.clone(),
            unit_files: config.service.unit_files.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReceipt {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the archived configuration bytes.
    pub config_hash: String,
    pub created_at: DateTime<Local>,
    /// Archive entries for unit files that were found.
    pub units: Vec<String>,
}

/// Archive `config_bytes` and the configured unit files into the backup dir.
pub fn export(settings: &BackupSettings, config_bytes: &[u8]) -> Result<BackupReceipt, ArchiveError> {
    let created_at = Local::now();
    let (archive, units) = build_archive(config_bytes, &settings.unit_files, created_at.timestamp())?;

    fs::create_dir_all(&settings.backup_dir)
        .map_err(|e| ArchiveError::io("create backup dir", &settings.backup_dir, e))?;
    let path = unique_name(&settings.backup_dir, &created_at);
    write_atomic(&path, &archive).map_err(|e| ArchiveError::io("write archive", &path, e))?;

    let receipt = BackupReceipt {
        size_bytes: archive.len() as u64,
        config_hash: hex::encode(Sha256::digest(config_bytes)),
        path,
        created_at,
        units,
    };
    tracing::info!(
        path = %receipt.path.display(),
        size = receipt.size_bytes,
        hash = %receipt.config_hash,
        "Backup created"
    );
    Ok(receipt)
}

/// Configuration bytes from a backup archive or a plain JSON file.
pub fn read_config(path: &Path) -> Result<Vec<u8>, ArchiveError> {
    let bytes = fs::read(path).map_err(|e| ArchiveError::io("read backup", path, e))?;
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }

    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::io("list archive", path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::io("read archive entry", path, e))?;
        let is_config = entry
            .path()
            .map(|p| p == Path::new(CONFIG_ENTRY))
            .unwrap_or(false);
        if is_config {
            let mut config = Vec::new();
            entry
                .read_to_end(&mut config)
                .map_err(|e| ArchiveError::io("extract config", path, e))?;
            return Ok(config);
        }
    }
    Err(ArchiveError::MissingConfig {
        path: path.to_path_buf(),
    })
}

fn build_archive(
    config_bytes: &[u8],
    unit_files: &[PathBuf],
    mtime: i64,
) -> Result<(Vec<u8>, Vec<String>), ArchiveError> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let archive_path = Path::new("<archive>");

    append(&mut builder, CONFIG_ENTRY, config_bytes, mtime)
        .map_err(|e| ArchiveError::io("append config", archive_path, e))?;

    let mut units = Vec::new();
    for unit in unit_files {
        let Some(name) = unit.file_name() else {
            continue;
        };
        let contents = match fs::read(unit) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(unit = %unit.display(), "Unit file not found; left out of backup");
                continue;
            }
            Err(e) => return Err(ArchiveError::io("read unit file", unit, e)),
        };
        let entry = format!("{}/{}", UNITS_DIR, name.to_string_lossy());
        append(&mut builder, &entry, &contents, mtime)
            .map_err(|e| ArchiveError::io("append unit file", unit, e))?;
        units.push(entry);
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| ArchiveError::io("finish archive", archive_path, e))?;
    let archive = encoder
        .finish()
        .map_err(|e| ArchiveError::io("compress archive", archive_path, e))?;
    Ok((archive, units))
}

fn append<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8], mtime: i64) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime.max(0) as u64);
    builder.append_data(&mut header, name, data)
}

fn unique_name(dir: &Path, at: &DateTime<Local>) -> PathBuf {
    let stem = format!("config_backup_{}", at.format("%Y%m%d_%H%M%S"));
    let mut candidate = dir.join(format!("{}.tar.gz", stem));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.tar.gz", stem, n));
        n += 1;
    }
    candidate
}
