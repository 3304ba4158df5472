//! Tables, columns, filters and relations of a change schema.

use crate::error::{CoreError, CoreResult};
use crate::schema::row::Row;
use crate::schema::SchemaId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which legs of a synchronization a table takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Changes flow both ways.
    #[default]
    Bidirectional,
    /// Only the upload leg carries this table.
    UploadOnly,
    /// Only the download leg carries this table.
    DownloadOnly,
}

/// Identity of a table: its name and optional schema (namespace) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Table name.
    #[serde(rename = "name")]
    pub name: String,
    /// Schema (namespace) name, if the engine has one.
    #[serde(rename = "schema", default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

impl TableRef {
    /// Creates a table reference.
    pub fn new(name: impl Into<String>, schema_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            schema_name: schema_name.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// Compares two references, honouring the schema's case sensitivity.
    ///
    /// A missing schema name matches an empty one.
    pub fn matches(&self, other: &TableRef, case_sensitive: bool) -> bool {
        names_match(&self.name, &other.name, case_sensitive)
            && names_match(
                self.schema_name.as_deref().unwrap_or(""),
                other.schema_name.as_deref().unwrap_or(""),
                case_sensitive,
            )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema_name {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

pub(crate) fn names_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Engine type name, informational only.
    pub data_type: String,
    /// Whether the column accepts nulls.
    pub allow_null: bool,
}

impl Column {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            allow_null: true,
        }
    }

    /// Marks the column as not nullable.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }
}

/// A table of a change schema, optionally holding changed rows.
#[derive(Debug, Clone)]
pub struct SchemaTable {
    owner: Option<SchemaId>,
    table: TableRef,
    columns: Vec<Column>,
    primary_keys: Vec<String>,
    direction: SyncDirection,
    rows: Vec<Row>,
}

impl SchemaTable {
    /// Creates an empty, unattached table.
    pub fn new(name: impl Into<String>, schema_name: Option<&str>) -> Self {
        Self {
            owner: None,
            table: TableRef::new(name, schema_name),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            direction: SyncDirection::Bidirectional,
            rows: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Declares the primary key columns.
    #[must_use]
    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the sync direction.
    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Returns the schema this table is attached to.
    pub fn owner(&self) -> Option<SchemaId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: SchemaId) {
        self.owner = Some(owner);
    }

    /// Returns the table identity.
    pub fn table_ref(&self) -> &TableRef {
        &self.table
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.table.name
    }

    /// Returns the schema (namespace) name.
    pub fn schema_name(&self) -> Option<&str> {
        self.table.schema_name.as_deref()
    }

    /// Returns the column definitions.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the primary key column names.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Returns the sync direction.
    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// Returns the position of a column.
    ///
    /// Column names are matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Returns the rows held by this table.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the number of rows held by this table.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table holds at least one row.
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Returns a column value of a row of this table.
    pub fn value<'r>(&self, row: &'r Row, column: &str) -> Option<&'r Value> {
        self.column_index(column).and_then(|i| row.get(i))
    }

    /// Creates a row of nulls shaped for this table.
    pub(crate) fn new_row(&self) -> Row {
        Row::empty(self.columns.len())
    }

    /// Sets a named field of a row shaped for this table.
    pub(crate) fn set_field(&self, row: &mut Row, column: &str, value: Value) -> CoreResult<()> {
        let index = self
            .column_index(column)
            .ok_or_else(|| CoreError::unknown_column(self.table.to_string(), column))?;
        row.set(index, value);
        Ok(())
    }

    pub(crate) fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub(crate) fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    /// Drops all rows, keeping the structure.
    pub fn clear(&mut self) {
        self.rows = Vec::new();
    }

    /// Copies the structure of this table without rows or owner.
    pub fn clone_structure(&self) -> Self {
        Self {
            owner: None,
            table: self.table.clone(),
            columns: self.columns.clone(),
            primary_keys: self.primary_keys.clone(),
            direction: self.direction,
            rows: Vec::new(),
        }
    }
}

/// A named filter parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParameter {
    /// Parameter name, bound against the context parameters.
    pub name: String,
    /// Engine type name, informational only.
    pub data_type: String,
}

impl FilterParameter {
    /// Creates a filter parameter.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row filter attached to one table.
#[derive(Debug, Clone)]
pub struct TableFilter {
    owner: Option<SchemaId>,
    table: TableRef,
    parameters: Vec<FilterParameter>,
}

impl TableFilter {
    /// Creates a filter for a table.
    pub fn new(name: impl Into<String>, schema_name: Option<&str>) -> Self {
        Self {
            owner: None,
            table: TableRef::new(name, schema_name),
            parameters: Vec::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: FilterParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Returns the schema this filter is attached to.
    pub fn owner(&self) -> Option<SchemaId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: SchemaId) {
        self.owner = Some(owner);
    }

    /// Returns the filtered table.
    pub fn table_ref(&self) -> &TableRef {
        &self.table
    }

    /// Returns the filter parameters.
    pub fn parameters(&self) -> &[FilterParameter] {
        &self.parameters
    }

    pub(crate) fn detached(&self) -> Self {
        Self {
            owner: None,
            table: self.table.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A foreign key relation between two tables.
#[derive(Debug, Clone)]
pub struct SchemaRelation {
    owner: Option<SchemaId>,
    name: String,
    parent: TableRef,
    parent_keys: Vec<String>,
    child: TableRef,
    child_keys: Vec<String>,
}

impl SchemaRelation {
    /// Creates a relation; `parent_keys` and `child_keys` pair up by position.
    pub fn new(
        name: impl Into<String>,
        parent: TableRef,
        parent_keys: Vec<String>,
        child: TableRef,
        child_keys: Vec<String>,
    ) -> Self {
        Self {
            owner: None,
            name: name.into(),
            parent,
            parent_keys,
            child,
            child_keys,
        }
    }

    /// Returns the schema this relation is attached to.
    pub fn owner(&self) -> Option<SchemaId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: SchemaId) {
        self.owner = Some(owner);
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the referenced (parent) table.
    pub fn parent(&self) -> &TableRef {
        &self.parent
    }

    /// Returns the parent key columns.
    pub fn parent_keys(&self) -> &[String] {
        &self.parent_keys
    }

    /// Returns the referencing (child) table.
    pub fn child(&self) -> &TableRef {
        &self.child
    }

    /// Returns the child key columns.
    pub fn child_keys(&self) -> &[String] {
        &self.child_keys
    }

    pub(crate) fn detached(&self) -> Self {
        Self {
            owner: None,
            ..self.clone()
        }
    }
}
