//! JSON description of an on-disk batch.
//!
//! The manifest lets a batch be reopened later without querying the data
//! source again. It carries no schema: the reader rebinds it to a schema of
//! its own.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableRef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the manifest inside a batch directory.
pub const MANIFEST_FILE: &str = "summary.json";

/// Description of one part in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// Position of the part.
    pub index: u32,
    /// File name relative to the batch directory.
    pub file: String,
    /// Whether this is the final part.
    pub last: bool,
    /// Tables the part holds rows for.
    #[serde(default)]
    pub tables: Vec<TableRef>,
}

/// Description of a whole on-disk batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    /// Batch directory name.
    #[serde(rename = "dirname")]
    pub directory_name: String,
    /// Root the batch directory lives under.
    #[serde(rename = "dir")]
    pub directory_root: PathBuf,
    /// Source watermark the batch was taken at.
    #[serde(rename = "ts", default)]
    pub timestamp: u64,
    /// Parts in index order.
    #[serde(default)]
    pub parts: Vec<PartDescriptor>,
}

impl BatchManifest {
    /// Returns the batch directory this manifest describes.
    pub fn directory_full_path(&self) -> PathBuf {
        self.directory_root.join(&self.directory_name)
    }

    /// Checks the part layout.
    ///
    /// Indices must be the dense sequence `0..N` in order, file names must be
    /// unique, and a non-empty manifest must have exactly one last part
    /// sitting at the highest index.
    pub fn validate(&self) -> CoreResult<()> {
        if self.directory_name.is_empty() {
            return Err(CoreError::invalid_manifest("empty directory name"));
        }

        let mut files = HashSet::new();
        for (position, part) in self.parts.iter().enumerate() {
            if part.index as usize != position {
                return Err(CoreError::invalid_manifest(format!(
                    "part at position {position} has index {}",
                    part.index
                )));
            }
            if !files.insert(part.file.as_str()) {
                return Err(CoreError::invalid_manifest(format!(
                    "file {} listed twice",
                    part.file
                )));
            }
        }

        let last_parts: Vec<u32> = self
            .parts
            .iter()
            .filter(|p| p.last)
            .map(|p| p.index)
            .collect();

        match (self.parts.last(), last_parts.as_slice()) {
            (None, []) => Ok(()),
            (None, _) => Err(CoreError::invalid_manifest("last flag without parts")),
            (Some(max), [index]) if *index == max.index => Ok(()),
            (Some(_), []) => Err(CoreError::invalid_manifest("no part is marked last")),
            (Some(max), indices) => Err(CoreError::invalid_manifest(format!(
                "parts {indices:?} are marked last, expected only {}",
                max.index
            ))),
        }
    }

    /// Serializes the manifest to JSON.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a manifest from JSON.
    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Writes the manifest into `directory` with a single write.
    ///
    /// Fails if a manifest already exists there.
    pub fn write(&self, directory: &Path) -> CoreResult<PathBuf> {
        let path = directory.join(MANIFEST_FILE);
        let bytes = self.to_json()?;

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(&bytes)?;
        Ok(path)
    }

    /// Reads the manifest stored in `directory`.
    pub fn read(directory: &Path) -> CoreResult<Self> {
        let bytes = std::fs::read(directory.join(MANIFEST_FILE))?;
        Self::from_json(&bytes)
    }
}
