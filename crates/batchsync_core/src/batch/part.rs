//! A single physical chunk of a batch.

use crate::batch::manifest::PartDescriptor;
use crate::batch::random_token;
use crate::error::{CoreError, CoreResult};
use crate::schema::{ChangeSchema, SchemaTable, TableRef, WireContainer};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Extension of part files.
pub const PART_EXTENSION: &str = "batch";

/// Highest part index the three-digit file naming can express.
pub const MAX_PART_INDEX: u32 = 999;

/// Metadata of one part file: its position, file name and the tables it
/// holds rows for.
///
/// The rows themselves stay on disk until [`BatchPart::load`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPart {
    index: u32,
    file_name: String,
    tables: Vec<TableRef>,
    is_last: bool,
}

impl BatchPart {
    /// Moves the rows of `changes` into a new part file under `directory`.
    ///
    /// The file is written with a single buffered write. Fails with
    /// [`CoreError::BatchOverflow`] before touching the disk if `index`
    /// needs more than three digits.
    pub(crate) fn create(
        index: u32,
        changes: &mut ChangeSchema,
        directory: &Path,
        is_last: bool,
    ) -> CoreResult<Self> {
        let file_name = part_file_name(index)?;
        let container = changes.export_wire();
        let tables = container.table_refs();
        let bytes = container.encode()?;

        fs::create_dir_all(directory)?;
        fs::write(directory.join(&file_name), &bytes)?;

        debug!(
            index,
            file = %file_name,
            rows = container.row_count(),
            bytes = bytes.len(),
            is_last,
            "wrote batch part"
        );

        Ok(Self {
            index,
            file_name,
            tables,
            is_last,
        })
    }

    pub(crate) fn from_descriptor(descriptor: PartDescriptor) -> Self {
        Self {
            index: descriptor.index,
            file_name: descriptor.file,
            tables: descriptor.tables,
            is_last: descriptor.last,
        }
    }

    pub(crate) fn descriptor(&self) -> PartDescriptor {
        PartDescriptor {
            index: self.index,
            file: self.file_name.clone(),
            last: self.is_last,
            tables: self.tables.clone(),
        }
    }

    /// Returns the position of this part within its batch.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the part file name, relative to the batch directory.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the tables this part holds rows for.
    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    /// Returns true if this is the final part of its batch.
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub(crate) fn set_last(&mut self, is_last: bool) {
        self.is_last = is_last;
    }

    /// Returns true if this part holds rows for `table`.
    pub fn references(&self, table: &TableRef, case_sensitive: bool) -> bool {
        self.tables.iter().any(|t| t.matches(table, case_sensitive))
    }

    /// Reads the raw wire container of this part.
    pub fn read_wire(&self, directory: &Path) -> CoreResult<WireContainer> {
        let bytes = fs::read(directory.join(&self.file_name))?;
        WireContainer::decode(&bytes)
    }

    /// Loads the rows of this part into a structural copy of `schema`.
    ///
    /// The returned handle owns the rows; release it before loading the next
    /// part so only one part is resident at a time.
    pub fn load(&self, schema: &ChangeSchema, directory: &Path) -> CoreResult<LoadedPart<'_>> {
        let container = self.read_wire(directory)?;
        let mut data = schema.clone_structure(true);
        data.import_wire(container)?;
        Ok(LoadedPart { part: self, data })
    }
}

/// Rows of a part held in memory between [`BatchPart::load`] and
/// [`LoadedPart::release`].
#[derive(Debug)]
pub struct LoadedPart<'a> {
    part: &'a BatchPart,
    data: ChangeSchema,
}

impl LoadedPart<'_> {
    /// Returns the part these rows belong to.
    pub fn part(&self) -> &BatchPart {
        self.part
    }

    /// Returns the loaded rows.
    pub fn data(&self) -> &ChangeSchema {
        &self.data
    }

    /// Returns true if any table of the part holds a row.
    pub fn has_rows(&self) -> bool {
        self.data.has_rows()
    }

    /// Moves the rows of one table out of the loaded part.
    pub fn take_table(&mut self, table: &TableRef) -> Option<SchemaTable> {
        let loaded = self.data.table_mut(table)?;
        let shell = loaded.clone_structure();
        Some(std::mem::replace(loaded, shell))
    }

    /// Drops the loaded rows.
    pub fn release(self) {
        drop(self.data);
    }
}

/// Builds the file name of a part: a zero-padded three-digit index and a
/// random token.
pub fn part_file_name(index: u32) -> CoreResult<String> {
    if index > MAX_PART_INDEX {
        return Err(CoreError::BatchOverflow { index });
    }
    Ok(format!(
        "{index:03}_{}_{}.{PART_EXTENSION}",
        random_token(8),
        random_token(3)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, RowState};
    use crate::value::Value;
    use tempfile::tempdir;

    fn schema() -> ChangeSchema {
        ChangeSchema::new("src", false, None, "scope")
            .with_table(
                SchemaTable::new("Product", None)
                    .with_column(Column::new("ProductID", "int"))
                    .with_column(Column::new("Name", "text")),
            )
            .with_table(SchemaTable::new("Empty", None).with_column(Column::new("Id", "int")))
    }

    fn with_rows(schema: &ChangeSchema, count: i64) -> ChangeSchema {
        let mut changes = schema.clone_structure(true);
        let table = changes.table_mut(&TableRef::new("Product", None)).unwrap();
        for id in 0..count {
            let mut row = table.new_row();
            table.set_field(&mut row, "ProductID", Value::Integer(id)).unwrap();
            table.set_field(&mut row, "Name", Value::from(format!("p{id}"))).unwrap();
            table.push_row(row);
        }
        changes
    }

    #[test]
    fn file_name_format() {
        let name = part_file_name(7).unwrap();
        assert!(name.starts_with("007_"));
        assert!(name.ends_with(".batch"));
        assert_eq!(name.len(), "007_".len() + 8 + 1 + 3 + ".batch".len());

        assert!(part_file_name(999).unwrap().starts_with("999_"));
        assert!(matches!(
            part_file_name(1000),
            Err(CoreError::BatchOverflow { index: 1000 })
        ));
    }

    #[test]
    fn create_then_load() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut changes = with_rows(&schema, 3);

        let part = BatchPart::create(0, &mut changes, dir.path(), false).unwrap();
        assert!(!changes.has_rows());
        assert_eq!(part.index(), 0);
        assert!(!part.is_last());
        assert_eq!(part.tables(), &[TableRef::new("Product", None)]);
        assert!(part.references(&TableRef::new("PRODUCT", None), false));
        assert!(!part.references(&TableRef::new("Empty", None), false));
        assert!(dir.path().join(part.file_name()).exists());

        let mut loaded = part.load(&schema, dir.path()).unwrap();
        assert!(loaded.has_rows());
        let fragment = loaded.take_table(&TableRef::new("Product", None)).unwrap();
        assert_eq!(fragment.row_count(), 3);
        assert_eq!(fragment.rows()[2].state(), RowState::Modified);
        assert!(!loaded.has_rows());
        loaded.release();

        // loading again reads the file afresh
        let loaded = part.load(&schema, dir.path()).unwrap();
        assert_eq!(loaded.data().row_count(), 3);
        loaded.release();
    }

    #[test]
    fn overflow_writes_nothing() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut changes = with_rows(&schema, 1);

        let err = BatchPart::create(1000, &mut changes, dir.path(), true).unwrap_err();
        assert!(matches!(err, CoreError::BatchOverflow { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn load_against_foreign_schema_fails() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let mut changes = with_rows(&schema, 1);
        let part = BatchPart::create(0, &mut changes, dir.path(), true).unwrap();

        let other = ChangeSchema::new("src", false, None, "scope")
            .with_table(SchemaTable::new("Customer", None));
        let err = part.load(&other, dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownTable { .. }));
    }
}
