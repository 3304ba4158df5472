//! CLI command implementations.

pub mod clean;
pub mod dump;
pub mod inspect;
pub mod snapshot_name;
pub mod verify;

use batchsync_core::{BatchManifest, CoreError, PartDescriptor, WireContainer, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory has no manifest.
    #[error("no batch manifest found in {0:?}")]
    NoManifest(PathBuf),

    /// A parameter argument is not of the form `name=value`.
    #[error("invalid parameter '{0}': expected name=value")]
    InvalidParameter(String),

    /// The requested part is not in the manifest.
    #[error("part {0} not found in manifest")]
    PartNotFound(u32),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// Error from the batch engine.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Reads the manifest of the batch directory at `path`.
pub fn read_manifest(path: &Path) -> Result<BatchManifest, CliError> {
    if !path.join(MANIFEST_FILE).exists() {
        return Err(CliError::NoManifest(path.to_path_buf()));
    }
    Ok(BatchManifest::read(path)?)
}

/// Decodes the part file described by `part`.
///
/// Files are resolved against `path` rather than the root recorded in the
/// manifest, so moved directories can still be read.
pub fn read_part(path: &Path, part: &PartDescriptor) -> Result<WireContainer, CliError> {
    let bytes = std::fs::read(path.join(&part.file)).map_err(CoreError::from)?;
    Ok(WireContainer::decode(&bytes)?)
}
