//! Parameter-scoped full snapshots.
//!
//! A snapshot is a complete on-disk batch of every live row, rebuilt from
//! scratch on each refresh and stored under a directory named after the
//! filter parameters it was built with. New requesters with the same
//! parameters can then be seeded from disk without querying the source.
//!
//! Two builds for the same parameters share a directory and are not
//! serialized against each other; the last writer wins.

use crate::batch::{remove_directory_best_effort, Batch, BatchManifest};
use crate::config::{SyncContext, SyncParameters};
use crate::error::CoreResult;
use crate::schema::{ChangeSchema, SchemaTable};
use crate::selector::{discard, ChangeSelector, ScanSettings};
use crate::source::DataSource;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory name used when no parameter is set.
pub const ALL_DIRECTORY: &str = "ALL";

/// Returns the snapshot directory name for a parameter set.
///
/// Names and values are stripped down to alphanumeric characters, the
/// pairs are sorted by sanitized name and then by sanitized value (ordinal
/// string order), and the `name_value` pairs are joined with underscores.
/// An empty set gives [`ALL_DIRECTORY`].
pub fn snapshot_directory_name(parameters: &SyncParameters) -> String {
    let mut pairs: Vec<(String, String)> = parameters
        .iter()
        .map(|p| (sanitize(&p.name), sanitize(&p.value.to_string())))
        .collect();
    pairs.sort();

    let name = pairs
        .iter()
        .map(|(name, value)| format!("{name}_{value}"))
        .collect::<Vec<_>>()
        .join("_");

    if name.is_empty() {
        ALL_DIRECTORY.to_string()
    } else {
        name
    }
}

fn sanitize(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Builds snapshots through a [`ChangeSelector`].
pub struct SnapshotBuilder<S: DataSource> {
    selector: ChangeSelector<S>,
}

impl<S: DataSource> SnapshotBuilder<S> {
    /// Creates a builder scanning through `selector`.
    pub fn new(selector: ChangeSelector<S>) -> Self {
        Self { selector }
    }

    /// Returns the selector used for scanning.
    pub fn selector(&self) -> &ChangeSelector<S> {
        &self.selector
    }

    /// Rebuilds the snapshot for the context's parameters under `root`.
    ///
    /// Any previous snapshot for the same parameters is deleted first. Every
    /// table is scanned as for a new requester. With a zero `batch_size` the
    /// whole snapshot goes into a single part. The batch watermark is the
    /// source's current timestamp, and the manifest is written last. If any
    /// step fails, the partial snapshot directory is deleted.
    pub fn create_snapshot(
        &self,
        context: &SyncContext,
        schema: &ChangeSchema,
        root: &Path,
        batch_size: u64,
    ) -> CoreResult<Batch> {
        let directory_name = snapshot_directory_name(&context.parameters);
        remove_directory_best_effort(&root.join(&directory_name));

        let mut batch = Batch::on_disk(schema, root, Some(&directory_name));
        let tables: Vec<&SchemaTable> = schema.tables().iter().collect();
        let settings = ScanSettings {
            is_new: true,
            last_timestamp: 0,
            excluding_scope_id: None,
            batch_size,
        };

        let built = self
            .selector
            .scan(context, schema, &tables, settings, &mut batch)
            .and_then(|stats| {
                batch.set_timestamp(self.selector.source().current_timestamp()?);
                Ok((stats, batch.write_manifest()?))
            });
        let (stats, manifest) = match built {
            Ok(built) => built,
            Err(e) => {
                discard(&mut batch, &e);
                return Err(e);
            }
        };

        info!(
            directory = %directory_name,
            parts = batch.parts().len(),
            rows = stats.total_changes(),
            timestamp = batch.timestamp(),
            manifest = %manifest.display(),
            "snapshot created"
        );

        Ok(batch)
    }
}

/// Reopens the snapshot for a parameter set, bound to a structural copy of
/// `schema`. Returns `None` if no snapshot exists.
pub fn get_snapshot(
    parameters: &SyncParameters,
    schema: &ChangeSchema,
    root: &Path,
) -> CoreResult<Option<Batch>> {
    let directory = snapshot_directory(parameters, root);
    if !directory.exists() {
        return Ok(None);
    }

    let manifest = BatchManifest::read(&directory)?;
    Batch::from_manifest(manifest, schema).map(Some)
}

/// Returns the full snapshot directory for a parameter set.
pub fn snapshot_directory(parameters: &SyncParameters, root: &Path) -> PathBuf {
    root.join(snapshot_directory_name(parameters))
}
