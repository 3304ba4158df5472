//! Verify command implementation.

use super::{read_manifest, read_part, CliError};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of parts checked.
    pub parts_checked: usize,
    /// Number of parts that decoded and matched their descriptor.
    pub valid_parts: usize,
    /// List of problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying batch at {path:?}");
    println!();

    let result = verify(path)?;
    for error in &result.errors {
        println!("  ✗ {error}");
    }
    println!(
        "Parts: {} checked, {} valid",
        result.parts_checked, result.valid_parts
    );

    println!();
    if result.is_ok() {
        println!("✓ Batch verification passed");
        Ok(())
    } else {
        println!("✗ Batch verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks the manifest layout and every part file of the batch at `path`.
///
/// Each part must exist, decode, and hold rows only for tables its
/// descriptor lists. Files in the directory that no part claims are
/// reported as stray.
pub fn verify(path: &Path) -> Result<VerifyResult, CliError> {
    let manifest = read_manifest(path)?;
    let mut result = VerifyResult::default();

    if let Err(e) = manifest.validate() {
        result.errors.push(format!("manifest: {e}"));
    }

    for descriptor in &manifest.parts {
        result.parts_checked += 1;
        debug!(index = descriptor.index, file = %descriptor.file, "checking part");

        let container = match read_part(path, descriptor) {
            Ok(container) => container,
            Err(e) => {
                result
                    .errors
                    .push(format!("part {} ({}): {e}", descriptor.index, descriptor.file));
                continue;
            }
        };

        let unlisted: Vec<String> = container
            .tables
            .iter()
            .filter(|t| !t.rows.is_empty())
            .map(|t| t.table_ref())
            .filter(|t| !descriptor.tables.contains(t))
            .map(|t| t.to_string())
            .collect();
        if unlisted.is_empty() {
            result.valid_parts += 1;
        } else {
            result.errors.push(format!(
                "part {} holds rows for unlisted tables: {}",
                descriptor.index,
                unlisted.join(", ")
            ));
        }
    }

    let claimed: HashSet<&str> = manifest.parts.iter().map(|p| p.file.as_str()).collect();
    for entry in std::fs::read_dir(path).map_err(batchsync_core::CoreError::from)? {
        let name = entry
            .map_err(batchsync_core::CoreError::from)?
            .file_name()
            .to_string_lossy()
            .into_owned();
        if name != batchsync_core::MANIFEST_FILE && !claimed.contains(name.as_str()) {
            result.errors.push(format!("stray file: {name}"));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_batch;
    use batchsync_core::BatchManifest;
    use tempfile::tempdir;

    #[test]
    fn sound_batch_passes() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let result = verify(&path).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.parts_checked, 4);
        assert_eq!(result.valid_parts, 4);
    }

    #[test]
    fn reports_missing_and_stray_files() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let manifest = BatchManifest::read(&path).unwrap();
        std::fs::remove_file(path.join(&manifest.parts[1].file)).unwrap();
        std::fs::write(path.join("leftover.batch"), b"junk").unwrap();

        let result = verify(&path).unwrap();
        assert_eq!(result.valid_parts, 3);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.starts_with("part 1")));
        assert!(result.errors.iter().any(|e| e == "stray file: leftover.batch"));
    }

    #[test]
    fn reports_corrupt_part() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let manifest = BatchManifest::read(&path).unwrap();
        std::fs::write(path.join(&manifest.parts[0].file), [0xff, 0x00, 0x13]).unwrap();

        let result = verify(&path).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.valid_parts, 3);
    }

    #[test]
    fn reports_bad_layout() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let mut manifest = BatchManifest::read(&path).unwrap();
        manifest.parts[0].last = true;
        std::fs::write(path.join(batchsync_core::MANIFEST_FILE), manifest.to_json().unwrap())
            .unwrap();

        let result = verify(&path).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("manifest:"));
    }
}
