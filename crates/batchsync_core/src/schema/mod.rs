//! In-memory relational shape of a synchronization scope.
//!
//! A [`ChangeSchema`] owns its tables, relations and filters in flat
//! vectors. Children refer back to their schema through a [`SchemaId`]
//! rather than a pointer, so a structural clone is a plain copy followed by
//! [`ChangeSchema::ensure_schema`] to re-parent everything.

mod row;
mod table;
mod wire;

pub use row::{Row, RowState};
pub use table::{
    Column, FilterParameter, SchemaRelation, SchemaTable, SyncDirection, TableFilter, TableRef,
};
pub use wire::{WireContainer, WireRow, WireTable};

use crate::error::{CoreError, CoreResult};
use std::fmt;
use uuid::Uuid;

/// Default scope name for a schema.
pub const DEFAULT_SCOPE_NAME: &str = "DefaultScope";

/// Stable identity of a [`ChangeSchema`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(Uuid);

impl SchemaId {
    /// Generates a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SchemaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Prefixes and suffixes used to name provisioned objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectNaming {
    /// Prefix for tracking tables.
    pub tracking_tables_prefix: String,
    /// Suffix for tracking tables.
    pub tracking_tables_suffix: String,
    /// Prefix for triggers.
    pub triggers_prefix: String,
    /// Suffix for triggers.
    pub triggers_suffix: String,
    /// Prefix for stored procedures.
    pub stored_procedures_prefix: String,
    /// Suffix for stored procedures.
    pub stored_procedures_suffix: String,
}

/// Tables, relations and filters of a scope, plus the rows held per table.
#[derive(Debug)]
pub struct ChangeSchema {
    id: SchemaId,
    data_source_name: String,
    scope_name: String,
    case_sensitive: bool,
    culture_name: Option<String>,
    naming: ObjectNaming,
    tables: Vec<SchemaTable>,
    relations: Vec<SchemaRelation>,
    filters: Vec<TableFilter>,
}

impl Default for ChangeSchema {
    fn default() -> Self {
        Self::new("", false, None, DEFAULT_SCOPE_NAME)
    }
}

impl ChangeSchema {
    /// Creates an empty schema.
    pub fn new(
        data_source_name: impl Into<String>,
        case_sensitive: bool,
        culture_name: Option<&str>,
        scope_name: impl Into<String>,
    ) -> Self {
        Self {
            id: SchemaId::new(),
            data_source_name: data_source_name.into(),
            scope_name: scope_name.into(),
            case_sensitive,
            culture_name: culture_name.map(str::to_string),
            naming: ObjectNaming::default(),
            tables: Vec::new(),
            relations: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Sets the naming conventions.
    #[must_use]
    pub fn with_naming(mut self, naming: ObjectNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, table: SchemaTable) -> Self {
        self.add_table(table);
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TableFilter) -> Self {
        self.add_filter(filter);
        self
    }

    /// Adds a relation.
    #[must_use]
    pub fn with_relation(mut self, relation: SchemaRelation) -> Self {
        self.add_relation(relation);
        self
    }

    /// Returns the identity of this schema.
    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// Returns the data source name.
    pub fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    /// Returns the scope name.
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Returns whether table names compare case-sensitively.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Returns the locale name.
    pub fn culture_name(&self) -> Option<&str> {
        self.culture_name.as_deref()
    }

    /// Returns the naming conventions.
    pub fn naming(&self) -> &ObjectNaming {
        &self.naming
    }

    /// Returns the tables.
    pub fn tables(&self) -> &[SchemaTable] {
        &self.tables
    }

    /// Returns the relations.
    pub fn relations(&self) -> &[SchemaRelation] {
        &self.relations
    }

    /// Returns the filters.
    pub fn filters(&self) -> &[TableFilter] {
        &self.filters
    }

    /// Attaches a table to this schema and returns it.
    pub fn add_table(&mut self, mut table: SchemaTable) -> &mut SchemaTable {
        table.set_owner(self.id);
        let index = self.tables.len();
        self.tables.push(table);
        &mut self.tables[index]
    }

    /// Attaches a filter to this schema.
    pub fn add_filter(&mut self, mut filter: TableFilter) {
        filter.set_owner(self.id);
        self.filters.push(filter);
    }

    /// Attaches a relation to this schema.
    pub fn add_relation(&mut self, mut relation: SchemaRelation) {
        relation.set_owner(self.id);
        self.relations.push(relation);
    }

    /// Points every table, relation and filter back at this schema.
    pub fn ensure_schema(&mut self) {
        let id = self.id;
        self.tables.iter_mut().for_each(|t| t.set_owner(id));
        self.relations.iter_mut().for_each(|r| r.set_owner(id));
        self.filters.iter_mut().for_each(|f| f.set_owner(id));
    }

    /// Finds a table by identity.
    pub fn table(&self, table: &TableRef) -> Option<&SchemaTable> {
        self.tables
            .iter()
            .find(|t| t.table_ref().matches(table, self.case_sensitive))
    }

    /// Finds a table by identity, mutably.
    pub fn table_mut(&mut self, table: &TableRef) -> Option<&mut SchemaTable> {
        let case_sensitive = self.case_sensitive;
        self.tables
            .iter_mut()
            .find(|t| t.table_ref().matches(table, case_sensitive))
    }

    /// Returns the filter declared for a table, if any.
    pub fn filter_for(&self, table: &TableRef) -> Option<&TableFilter> {
        self.filters
            .iter()
            .find(|f| f.table_ref().matches(table, self.case_sensitive))
    }

    /// Returns the table matching `template`, adding an empty copy of its
    /// structure first if this schema does not have it yet.
    pub fn ensure_table_shell(&mut self, template: &SchemaTable) -> &mut SchemaTable {
        match self.position(template.table_ref()) {
            Some(index) => &mut self.tables[index],
            None => self.add_table(template.clone_structure()),
        }
    }

    fn position(&self, table: &TableRef) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.table_ref().matches(table, self.case_sensitive))
    }

    /// Copies the structure of this schema into a new schema with its own
    /// identity. Rows are never copied.
    ///
    /// With `include_tables` false only the scope-level settings are copied.
    pub fn clone_structure(&self, include_tables: bool) -> Self {
        let mut clone = Self {
            id: SchemaId::new(),
            data_source_name: self.data_source_name.clone(),
            scope_name: self.scope_name.clone(),
            case_sensitive: self.case_sensitive,
            culture_name: self.culture_name.clone(),
            naming: self.naming.clone(),
            tables: Vec::new(),
            relations: Vec::new(),
            filters: Vec::new(),
        };

        if !include_tables {
            return clone;
        }

        clone.filters = self.filters.iter().map(TableFilter::detached).collect();
        clone.relations = self.relations.iter().map(SchemaRelation::detached).collect();
        clone.tables = self.tables.iter().map(SchemaTable::clone_structure).collect();
        clone.ensure_schema();
        clone
    }

    /// Loads rows from a wire container into the matching tables.
    ///
    /// Fails with [`CoreError::UnknownTable`] if the container references a
    /// table this schema does not define.
    pub fn import_wire(&mut self, container: WireContainer) -> CoreResult<()> {
        self.data_source_name = container.data_source_name;

        for wire_table in container.tables {
            let table_ref = wire_table.table_ref();
            let table = self
                .table_mut(&table_ref)
                .ok_or_else(|| CoreError::unknown_table(table_ref.to_string()))?;

            let width = table.columns().len();
            for wire_row in wire_table.rows {
                if wire_row.values.len() != width {
                    return Err(CoreError::decode(format!(
                        "row of {table_ref} has {} values, table has {width} columns",
                        wire_row.values.len()
                    )));
                }
                table.push_row(Row::from_parts(wire_row.values, wire_row.state));
            }
        }

        Ok(())
    }

    /// Moves the rows of this schema into a wire container.
    ///
    /// Tables without rows are left out. The schema keeps its structure and
    /// ends up empty of rows.
    pub fn export_wire(&mut self) -> WireContainer {
        let mut container = WireContainer::new(self.data_source_name.clone());

        for table in &mut self.tables {
            if !table.has_rows() {
                continue;
            }
            let rows = table
                .take_rows()
                .into_iter()
                .map(|row| WireRow {
                    state: row.state(),
                    values: row.into_values(),
                })
                .collect();
            container.tables.push(WireTable {
                table_name: table.name().to_string(),
                schema_name: table.schema_name().map(str::to_string),
                rows,
            });
        }

        container
    }

    /// Drops every row, keeping the structure.
    pub fn clear(&mut self) {
        self.tables.iter_mut().for_each(SchemaTable::clear);
    }

    /// Returns true if the schema has at least one table.
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Returns true if at least one table has a column.
    pub fn has_columns(&self) -> bool {
        self.tables.iter().any(|t| !t.columns().is_empty())
    }

    /// Returns true if at least one table holds a row.
    pub fn has_rows(&self) -> bool {
        self.tables.iter().any(SchemaTable::has_rows)
    }

    /// Returns the total number of rows held.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(SchemaTable::row_count).sum()
    }
}
