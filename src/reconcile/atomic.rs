//! Rename-over-write file replacement.
//!
//! Bytes are written to a randomly named sibling of the destination, synced,
//! and renamed over it, so a reader sees either the old file or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Bytes staged beside their destination but not yet visible there.
///
/// Dropping a `StagedFile` without calling [`StagedFile::commit`] deletes
/// the temporary file, which is what happens when an apply is abandoned
/// before its commit point.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Where the staged bytes currently live.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename over the destination and make the rename durable.
    pub fn commit(self) -> io::Result<()> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| e.error)?;
        sync_dir(parent_dir(&target));
        Ok(())
    }
}

/// Write `bytes` to a temporary sibling of `target`.
///
/// The staged file keeps the destination's extension (the validator picks
/// the format from it) and, if the destination exists, its permissions.
pub fn stage(target: &Path, bytes: &[u8]) -> io::Result<StagedFile> {
    let dir = parent_dir(target);
    let prefix = match target.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".staged.".to_string(),
    };
    let suffix = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)?;

    if let Ok(meta) = fs::metadata(target) {
        temp.as_file().set_permissions(meta.permissions())?;
    }

    temp.as_file_mut().write_all(bytes)?;
    temp.as_file().sync_all()?;

    Ok(StagedFile {
        temp,
        target: target.to_path_buf(),
    })
}

/// Stage and commit in one step.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    stage(target, bytes)?.commit()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// The rename has already happened; a failed directory fsync only weakens
/// durability across power loss, so it is logged rather than returned.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!(dir = %dir.display(), error = %e, "Directory fsync failed");
    }
}
