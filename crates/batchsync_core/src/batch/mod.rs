//! Batches of changed rows.
//!
//! A [`Batch`] is either a single in-memory change set or an ordered list of
//! part files in a directory of its own. Selection appends to it chunk by
//! chunk, then calls [`Batch::finalize_tail`] once scanning is over so that
//! exactly one part carries the last flag.

mod manifest;
mod part;

pub use manifest::{BatchManifest, PartDescriptor, MANIFEST_FILE};
pub use part::{part_file_name, BatchPart, LoadedPart, MAX_PART_INDEX, PART_EXTENSION};

use crate::error::{CoreError, CoreResult};
use crate::schema::{ChangeSchema, SchemaTable, TableRef};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Returns a random lowercase alphanumeric token.
pub(crate) fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Generates a batch directory name from the current UTC time and a random
/// token, so concurrent passes never share a directory.
pub fn generate_directory_name() -> String {
    format!("{}{}", Utc::now().format("%Y_%m_%d_%S"), random_token(11))
}

#[derive(Debug)]
enum Storage {
    InMemory {
        data: Option<ChangeSchema>,
    },
    OnDisk {
        root: PathBuf,
        name: String,
        parts: Vec<BatchPart>,
    },
}

/// The changes produced by one selection or snapshot pass.
#[derive(Debug)]
pub struct Batch {
    schema: ChangeSchema,
    storage: Storage,
    timestamp: u64,
}

impl Batch {
    /// Creates a batch bound to a structural copy of `schema`.
    ///
    /// On-disk batches get a generated directory name when none is given.
    /// In-memory batches ignore `root` and `directory_name`.
    pub fn new(
        in_memory: bool,
        schema: &ChangeSchema,
        root: impl Into<PathBuf>,
        directory_name: Option<&str>,
    ) -> Self {
        if in_memory {
            Self::in_memory(schema)
        } else {
            Self::on_disk(schema, root, directory_name)
        }
    }

    /// Creates an in-memory batch.
    pub fn in_memory(schema: &ChangeSchema) -> Self {
        Self {
            schema: schema.clone_structure(true),
            storage: Storage::InMemory { data: None },
            timestamp: 0,
        }
    }

    /// Creates an on-disk batch under `root`.
    pub fn on_disk(
        schema: &ChangeSchema,
        root: impl Into<PathBuf>,
        directory_name: Option<&str>,
    ) -> Self {
        let name = directory_name
            .filter(|n| !n.is_empty())
            .map_or_else(generate_directory_name, str::to_string);

        Self {
            schema: schema.clone_structure(true),
            storage: Storage::OnDisk {
                root: root.into(),
                name,
                parts: Vec::new(),
            },
            timestamp: 0,
        }
    }

    /// Reopens an on-disk batch from its manifest, bound to a structural
    /// copy of `schema`.
    pub fn from_manifest(manifest: BatchManifest, schema: &ChangeSchema) -> CoreResult<Self> {
        manifest.validate()?;

        let parts = manifest
            .parts
            .into_iter()
            .map(BatchPart::from_descriptor)
            .collect();

        Ok(Self {
            schema: schema.clone_structure(true),
            storage: Storage::OnDisk {
                root: manifest.directory_root,
                name: manifest.directory_name,
                parts,
            },
            timestamp: manifest.timestamp,
        })
    }

    /// Returns the schema structure this batch is bound to.
    pub fn schema(&self) -> &ChangeSchema {
        &self.schema
    }

    /// Returns true if this batch holds its rows in memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::InMemory { .. })
    }

    /// Returns the source watermark of the batch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Sets the source watermark of the batch.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Returns the directory name, for on-disk batches.
    pub fn directory_name(&self) -> Option<&str> {
        match &self.storage {
            Storage::OnDisk { name, .. } => Some(name.as_str()),
            Storage::InMemory { .. } => None,
        }
    }

    /// Returns the directory root, for on-disk batches.
    pub fn directory_root(&self) -> Option<&Path> {
        match &self.storage {
            Storage::OnDisk { root, .. } => Some(root.as_path()),
            Storage::InMemory { .. } => None,
        }
    }

    /// Returns the batch directory, for on-disk batches.
    pub fn directory_full_path(&self) -> Option<PathBuf> {
        match &self.storage {
            Storage::OnDisk { root, name, .. } => Some(root.join(name)),
            Storage::InMemory { .. } => None,
        }
    }

    /// Returns the parts, in index order. Empty for in-memory batches.
    pub fn parts(&self) -> &[BatchPart] {
        match &self.storage {
            Storage::OnDisk { parts, .. } => parts.as_slice(),
            Storage::InMemory { .. } => &[],
        }
    }

    /// Returns the held change set of an in-memory batch.
    pub fn in_memory_data(&self) -> Option<&ChangeSchema> {
        match &self.storage {
            Storage::InMemory { data } => data.as_ref(),
            Storage::OnDisk { .. } => None,
        }
    }

    /// Hands a chunk of changes to the batch.
    ///
    /// An in-memory batch replaces whatever it held. An on-disk batch writes
    /// the rows to a new part file and records the part. Fails with
    /// [`CoreError::BatchOverflow`] when `index` exceeds [`MAX_PART_INDEX`].
    pub fn append_changes(
        &mut self,
        mut changes: ChangeSchema,
        index: u32,
        is_last: bool,
    ) -> CoreResult<()> {
        match &mut self.storage {
            Storage::InMemory { data } => {
                *data = Some(changes);
                Ok(())
            }
            Storage::OnDisk { root, name, parts } => {
                let directory = root.join(name.as_str());
                let part = BatchPart::create(index, &mut changes, &directory, is_last)?;
                parts.push(part);
                Ok(())
            }
        }
    }

    /// Marks the part with the highest index as the only last part.
    ///
    /// Safe to call more than once.
    pub fn finalize_tail(&mut self) {
        if let Storage::OnDisk { parts, .. } = &mut self.storage {
            let Some(max) = parts.iter().map(BatchPart::index).max() else {
                return;
            };
            for part in parts.iter_mut() {
                part.set_last(part.index() == max);
            }
        }
    }

    /// Returns a lazy sequence of the fragments of one table.
    ///
    /// On disk, parts are visited in index order and only those listing the
    /// table are loaded. Each part is released before the next one is
    /// loaded. Every call starts over from the first part.
    pub fn iterate_table(&self, table: &TableRef) -> TableFragments<'_> {
        TableFragments {
            batch: self,
            table: table.clone(),
            position: 0,
            done: false,
        }
    }

    /// Returns true if the batch holds at least one row.
    ///
    /// On disk, parts are loaded one at a time in index order until one with
    /// rows is found.
    pub fn probe_has_data(&self) -> CoreResult<bool> {
        match &self.storage {
            Storage::InMemory { data } => Ok(data.as_ref().is_some_and(ChangeSchema::has_rows)),
            Storage::OnDisk { root, name, parts } => {
                let directory = root.join(name.as_str());
                for part in ordered(parts) {
                    let loaded = part.load(&self.schema, &directory)?;
                    let has_rows = loaded.has_rows();
                    loaded.release();
                    if has_rows {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Builds the manifest of an on-disk batch.
    pub fn manifest(&self) -> CoreResult<BatchManifest> {
        match &self.storage {
            Storage::OnDisk { root, name, parts } => Ok(BatchManifest {
                directory_name: name.clone(),
                directory_root: root.clone(),
                timestamp: self.timestamp,
                parts: ordered(parts).map(BatchPart::descriptor).collect(),
            }),
            Storage::InMemory { .. } => Err(CoreError::invalid_operation(
                "an in-memory batch has no manifest",
            )),
        }
    }

    /// Writes the manifest into the batch directory.
    pub fn write_manifest(&self) -> CoreResult<PathBuf> {
        let manifest = self.manifest()?;
        let directory = manifest.directory_full_path();
        fs::create_dir_all(&directory)?;
        manifest.write(&directory)
    }

    /// Deletes the batch directory, logging instead of failing.
    pub fn try_remove_directory(&self) {
        if let Some(directory) = self.directory_full_path() {
            remove_directory_best_effort(&directory);
        }
    }

    /// Releases the rows held by the batch.
    ///
    /// An on-disk batch forgets its parts and, with `delete_directory`,
    /// removes its directory. Deletion failures are logged and ignored.
    pub fn destroy(&mut self, delete_directory: bool) {
        if delete_directory {
            self.try_remove_directory();
        }
        match &mut self.storage {
            Storage::InMemory { data } => *data = None,
            Storage::OnDisk { parts, .. } => parts.clear(),
        }
    }
}

/// Removes a directory tree if it exists. Failures are logged at `warn`.
pub(crate) fn remove_directory_best_effort(directory: &Path) {
    if !directory.exists() {
        return;
    }
    match fs::remove_dir_all(directory) {
        Ok(()) => debug!(directory = %directory.display(), "removed batch directory"),
        Err(e) => warn!(
            directory = %directory.display(),
            error = %e,
            "failed to remove batch directory"
        ),
    }
}

fn ordered(parts: &[BatchPart]) -> impl Iterator<Item = &BatchPart> {
    let mut sorted: Vec<&BatchPart> = parts.iter().collect();
    sorted.sort_by_key(|p| p.index());
    sorted.into_iter()
}

/// Lazy sequence of the fragments of one table in a batch.
///
/// Returned by [`Batch::iterate_table`]. Stops after the first error.
#[derive(Debug)]
pub struct TableFragments<'a> {
    batch: &'a Batch,
    table: TableRef,
    position: usize,
    done: bool,
}

impl Iterator for TableFragments<'_> {
    type Item = CoreResult<SchemaTable>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let batch = self.batch;
        match &batch.storage {
            Storage::InMemory { data } => {
                self.done = true;
                data.as_ref()
                    .and_then(|d| d.table(&self.table))
                    .cloned()
                    .map(Ok)
            }
            Storage::OnDisk { root, name, parts } => {
                let case_sensitive = batch.schema.case_sensitive();
                let directory = root.join(name.as_str());
                let sorted: Vec<&BatchPart> = ordered(parts).collect();

                while let Some(part) = sorted.get(self.position) {
                    self.position += 1;
                    if !part.references(&self.table, case_sensitive) {
                        continue;
                    }

                    let mut loaded = match part.load(&batch.schema, &directory) {
                        Ok(loaded) => loaded,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    let fragment = loaded.take_table(&self.table);
                    loaded.release();

                    if let Some(fragment) = fragment {
                        return Some(Ok(fragment));
                    }
                }

                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Row, SyncDirection};
    use crate::value::Value;
    use tempfile::tempdir;

    fn schema() -> ChangeSchema {
        ChangeSchema::new("src", false, None, "scope")
            .with_table(
                SchemaTable::new("Product", None)
                    .with_column(Column::new("ProductID", "int"))
                    .with_column(Column::new("Name", "text")),
            )
            .with_table(
                SchemaTable::new("Customer", None)
                    .with_column(Column::new("CustomerID", "int"))
                    .with_direction(SyncDirection::DownloadOnly),
            )
    }

    fn products(schema: &ChangeSchema, ids: std::ops::Range<i64>) -> ChangeSchema {
        let mut changes = schema.clone_structure(true);
        let table = changes.table_mut(&TableRef::new("Product", None)).unwrap();
        for id in ids {
            let mut row = table.new_row();
            table.set_field(&mut row, "ProductID", Value::Integer(id)).unwrap();
            table.set_field(&mut row, "Name", Value::from(format!("p{id}"))).unwrap();
            table.push_row(row);
        }
        changes
    }

    fn ids(fragment: &SchemaTable) -> Vec<i64> {
        fragment
            .rows()
            .iter()
            .filter_map(|r| r.get(0).and_then(Value::as_integer))
            .collect()
    }

    #[test]
    fn generated_directory_names_differ() {
        let a = generate_directory_name();
        let b = generate_directory_name();
        assert_ne!(a, b);
        assert_eq!(a.len(), "yyyy_mm_dd_ss".len() + 11);
    }

    #[test]
    fn new_dispatches_on_mode() {
        let schema = schema();
        let memory = Batch::new(true, &schema, "/unused", Some("ignored"));
        assert!(memory.is_in_memory());
        assert!(memory.directory_name().is_none());
        assert!(memory.directory_full_path().is_none());

        let disk = Batch::new(false, &schema, "/root", Some("named"));
        assert!(!disk.is_in_memory());
        assert_eq!(disk.directory_full_path(), Some(PathBuf::from("/root/named")));

        let generated = Batch::new(false, &schema, "/root", None);
        assert!(generated.directory_name().is_some_and(|n| !n.is_empty()));
        assert_ne!(generated.schema().id(), schema.id());
    }

    #[test]
    fn in_memory_last_write_wins() {
        let schema = schema();
        let mut batch = Batch::in_memory(&schema);
        assert!(!batch.probe_has_data().unwrap());

        batch.append_changes(products(&schema, 0..2), 0, false).unwrap();
        batch.append_changes(products(&schema, 10..13), 1, true).unwrap();
        assert!(batch.parts().is_empty());
        assert!(batch.probe_has_data().unwrap());

        let fragments: Vec<_> = batch
            .iterate_table(&TableRef::new("product", None))
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(ids(&fragments[0]), vec![10, 11, 12]);

        batch.destroy(true);
        assert!(batch.in_memory_data().is_none());
        assert!(!batch.probe_has_data().unwrap());
    }

    #[test]
    fn on_disk_parts_and_iteration() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));

        batch.append_changes(products(&schema, 0..2), 0, false).unwrap();
        batch.append_changes(schema.clone_structure(true), 1, false).unwrap();
        batch.append_changes(products(&schema, 2..3), 2, true).unwrap();
        batch.finalize_tail();

        let parts = batch.parts();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].tables().is_empty());
        assert_eq!(parts.iter().filter(|p| p.is_last()).count(), 1);
        assert!(parts[2].is_last());

        let product = TableRef::new("Product", None);
        let fragments: Vec<_> = batch
            .iterate_table(&product)
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(ids(&fragments[0]), vec![0, 1]);
        assert_eq!(ids(&fragments[1]), vec![2]);

        // restartable
        assert_eq!(batch.iterate_table(&product).count(), 2);
        assert_eq!(batch.iterate_table(&TableRef::new("Customer", None)).count(), 0);
    }

    #[test]
    fn finalize_tail_is_idempotent() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        batch.finalize_tail();
        assert!(batch.parts().is_empty());

        batch.append_changes(products(&schema, 0..1), 0, false).unwrap();
        batch.append_changes(products(&schema, 1..2), 1, false).unwrap();
        batch.finalize_tail();
        batch.finalize_tail();
        let flags: Vec<bool> = batch.parts().iter().map(BatchPart::is_last).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn probe_scans_past_empty_first_part() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        batch.append_changes(schema.clone_structure(true), 0, false).unwrap();
        assert!(!batch.probe_has_data().unwrap());

        batch.append_changes(products(&schema, 0..1), 1, true).unwrap();
        assert!(batch.probe_has_data().unwrap());
    }

    #[test]
    fn overflow_rejects_index() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        let err = batch
            .append_changes(products(&schema, 0..1), 1000, false)
            .unwrap_err();
        assert!(matches!(err, CoreError::BatchOverflow { index: 1000 }));
        assert!(batch.parts().is_empty());
    }

    #[test]
    fn manifest_round_trip() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        batch.append_changes(products(&schema, 0..3), 0, false).unwrap();
        batch.append_changes(products(&schema, 3..5), 1, false).unwrap();
        batch.finalize_tail();
        batch.set_timestamp(99);

        let path = batch.write_manifest().unwrap();
        assert_eq!(path, dir.path().join("run").join(MANIFEST_FILE));

        let manifest = BatchManifest::read(&dir.path().join("run")).unwrap();
        let reopened = Batch::from_manifest(manifest, &schema).unwrap();
        assert_eq!(reopened.timestamp(), 99);
        assert_eq!(reopened.parts(), batch.parts());

        let product = TableRef::new("Product", None);
        let rows: Vec<Row> = reopened
            .iterate_table(&product)
            .flat_map(|f| f.unwrap().rows().to_vec())
            .collect();
        let expected = products(&schema, 0..5);
        assert_eq!(rows.as_slice(), expected.table(&product).unwrap().rows());
    }

    #[test]
    fn in_memory_has_no_manifest() {
        let batch = Batch::in_memory(&schema());
        assert!(matches!(
            batch.write_manifest(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn destroy_removes_directory() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        batch.append_changes(products(&schema, 0..1), 0, true).unwrap();
        let path = batch.directory_full_path().unwrap();
        assert!(path.exists());

        batch.destroy(true);
        assert!(!path.exists());
        assert!(batch.parts().is_empty());

        // nothing left to delete
        batch.destroy(true);
    }

    #[test]
    fn missing_part_file_surfaces_error() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut batch = Batch::on_disk(&schema, dir.path(), Some("run"));
        batch.append_changes(products(&schema, 0..1), 0, true).unwrap();
        let file = dir.path().join("run").join(batch.parts()[0].file_name());
        std::fs::remove_file(file).unwrap();

        let mut fragments = batch.iterate_table(&TableRef::new("Product", None));
        assert!(matches!(fragments.next(), Some(Err(CoreError::Io(_)))));
        assert!(fragments.next().is_none());
    }
}
