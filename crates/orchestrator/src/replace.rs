//! File operations after an encode: replacing the original, carrying over
//! timestamps, preserving partial output and removing transient artifacts.

use crate::naming::{with_suffix, ArtifactPaths, BACKUP_SUFFIX};
use log::{debug, warn};
use std::fs::{self, FileTimes, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Errors that can occur during file replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// A backup from an earlier run could not be removed.
    #[error("Failed to remove stale backup: {0}")]
    StaleBackup(io::Error),

    /// Failed to move the original out of the way.
    #[error("Failed to create backup: {0}")]
    BackupFailed(io::Error),

    /// Failed to move the encoded file to the original location.
    #[error("Failed to move encoded file into place: {0}")]
    MoveFailed(io::Error),

    /// Failed to move partial output to its error path.
    #[error("Failed to preserve partial output: {0}")]
    PreserveFailed(io::Error),

    /// Failed to read or apply file times.
    #[error("Failed to preserve timestamps: {0}")]
    Timestamps(io::Error),
}

/// Backup path for the original file: `<name>.old`
pub fn backup_path(original: &Path) -> PathBuf {
    with_suffix(original, BACKUP_SUFFIX)
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Access, modification and creation times of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTimes {
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl SourceTimes {
    pub fn capture(path: &Path) -> Result<Self, ReplaceError> {
        let meta = fs::metadata(path).map_err(ReplaceError::Timestamps)?;
        Ok(Self {
            accessed: meta.accessed().ok(),
            modified: meta.modified().ok(),
            created: meta.created().ok(),
        })
    }

    /// Apply the captured times to `path`
    ///
    /// Creation time can only be set on Windows; elsewhere it is skipped
    /// with a warning and never fails the call.
    pub fn apply(&self, path: &Path) -> Result<(), ReplaceError> {
        let mut times = FileTimes::new();
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }
        if let Some(modified) = self.modified {
            times = times.set_modified(modified);
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileTimesExt;
            if let Some(created) = self.created {
                times = times.set_created(created);
            }
        }
        #[cfg(not(windows))]
        if self.created.is_some() {
            warn!(
                "Creation time of {} not preserved: unsupported on this platform",
                path.display()
            );
        }

        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(ReplaceError::Timestamps)?;
        file.set_times(times).map_err(ReplaceError::Timestamps)
    }
}

/// Replaces the original file with the encoded file, keeping a backup.
///
/// This function performs the following steps:
/// 1. Capture the original's timestamps
/// 2. Remove any stale `<original>.old` and move the original there
/// 3. Move the encoded file to the original location, restoring the
///    original if that fails
///
/// Timestamps are applied to the new file by the caller, since failing to
/// preserve them must not fail the replacement.
///
/// # Returns
///
/// * `Ok((backup, times))` - backup path and the original's captured times
/// * `Err(ReplaceError)` - the original is back in place (or was never moved)
pub fn replace_original(
    original_path: &Path,
    encoded_path: &Path,
) -> Result<(PathBuf, Option<SourceTimes>), ReplaceError> {
    // Step 1: timestamps must be read before the original moves
    let times = SourceTimes::capture(original_path).ok();

    // Step 2: back up the original
    let backup = backup_path(original_path);
    if backup.exists() {
        fs::remove_file(&backup).map_err(ReplaceError::StaleBackup)?;
    }
    move_file(original_path, &backup).map_err(ReplaceError::BackupFailed)?;

    // Step 3: move the encoded file into place
    if let Err(e) = move_file(encoded_path, original_path) {
        if let Err(restore) = move_file(&backup, original_path) {
            warn!(
                "Could not restore {} from {}: {}",
                original_path.display(),
                backup.display(),
                restore
            );
        }
        return Err(ReplaceError::MoveFailed(e));
    }

    debug!(
        "Replaced {} (backup at {})",
        original_path.display(),
        backup.display()
    );
    Ok((backup, times))
}

/// Move partial output of a failed task to its `.error` path
///
/// # Returns
/// The error path when there was output to preserve
pub fn preserve_failed_output(output: &Path, error_path: &Path) -> Result<Option<PathBuf>, ReplaceError> {
    if !output.exists() {
        return Ok(None);
    }
    if error_path.exists() {
        fs::remove_file(error_path).map_err(ReplaceError::PreserveFailed)?;
    }
    move_file(output, error_path).map_err(ReplaceError::PreserveFailed)?;
    Ok(Some(error_path.to_path_buf()))
}

/// Delete every transient artifact of a task that exists
///
/// # Returns
/// One warning per file that could not be removed
pub fn cleanup_transient(paths: &ArtifactPaths) -> Vec<String> {
    let mut warnings = Vec::new();
    for path in paths.transient() {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warnings.push(format!("could not remove {}: {}", path.display(), e)),
        }
    }
    warnings
}
