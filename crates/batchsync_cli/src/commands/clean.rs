//! Clean command implementation.

use super::{read_manifest, CliError};
use std::path::Path;
use tracing::info;

/// What the clean command removed or would remove.
#[derive(Debug)]
pub struct CleanResult {
    /// Number of files in the directory.
    pub files: usize,
    /// Total size of those files in bytes.
    pub bytes: u64,
    /// Whether the directory was actually removed.
    pub removed: bool,
}

/// Runs the clean command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    let result = clean(path, dry_run)?;
    let action = if result.removed { "Removed" } else { "Would remove" };
    println!(
        "{action} {:?}: {} file(s), {} bytes",
        path, result.files, result.bytes
    );
    Ok(())
}

/// Removes the batch directory at `path`.
///
/// Only directories holding a readable manifest are removed, so a mistyped
/// path cannot wipe an unrelated tree.
pub fn clean(path: &Path, dry_run: bool) -> Result<CleanResult, CliError> {
    let manifest = read_manifest(path)?;

    let mut files = 0;
    let mut bytes = 0;
    for entry in std::fs::read_dir(path).map_err(batchsync_core::CoreError::from)? {
        let entry = entry.map_err(batchsync_core::CoreError::from)?;
        files += 1;
        bytes += entry.metadata().map_or(0, |m| m.len());
    }

    if !dry_run {
        std::fs::remove_dir_all(path).map_err(batchsync_core::CoreError::from)?;
        info!(
            directory = %path.display(),
            parts = manifest.parts.len(),
            "removed batch directory"
        );
    }

    Ok(CleanResult {
        files,
        bytes,
        removed: !dry_run,
    })
}
