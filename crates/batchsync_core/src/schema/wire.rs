//! Compact transfer form of changed rows.
//!
//! A [`WireContainer`] carries rows without any schema structure: each table
//! is identified by name and each row is a state marker plus its values in
//! column order. Part files are the CBOR encoding of a container.

use crate::error::{CoreError, CoreResult};
use crate::schema::row::RowState;
use crate::schema::table::TableRef;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Rows of a change set in transfer form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireContainer {
    /// Name of the data source the rows came from.
    #[serde(rename = "n", default)]
    pub data_source_name: String,
    /// Tables holding at least one row.
    #[serde(rename = "t", default)]
    pub tables: Vec<WireTable>,
}

/// Rows of a single table in transfer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTable {
    /// Table name.
    #[serde(rename = "n")]
    pub table_name: String,
    /// Schema (namespace) name.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    /// Rows, in insertion order.
    #[serde(rename = "r", default)]
    pub rows: Vec<WireRow>,
}

/// A single row in transfer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRow {
    /// Row state.
    #[serde(rename = "st")]
    pub state: RowState,
    /// Values in column order.
    #[serde(rename = "v")]
    pub values: Vec<Value>,
}

/// Borrowed form of [`WireRow`]; serializes to the same bytes.
#[derive(Serialize)]
struct WireRowRef<'a> {
    #[serde(rename = "st")]
    state: RowState,
    #[serde(rename = "v")]
    values: &'a [Value],
}

/// Sink that only counts the bytes written to it.
#[derive(Default)]
struct ByteCount(u64);

impl std::io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Returns the length of the CBOR encoding a row gets inside a part file.
///
/// A row that cannot be encoded measures `u64::MAX`, so it trips any size
/// limit instead of slipping under it.
pub(crate) fn encoded_row_len(state: RowState, values: &[Value]) -> u64 {
    let mut count = ByteCount::default();
    match ciborium::into_writer(&WireRowRef { state, values }, &mut count) {
        Ok(()) => count.0,
        Err(_) => u64::MAX,
    }
}

impl WireTable {
    /// Returns the identity of this table.
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.table_name.clone(), self.schema_name.as_deref())
    }
}

impl WireContainer {
    /// Creates an empty container.
    pub fn new(data_source_name: impl Into<String>) -> Self {
        Self {
            data_source_name: data_source_name.into(),
            tables: Vec::new(),
        }
    }

    /// Returns true if no table holds a row.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.rows.is_empty())
    }

    /// Returns the total number of rows across tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Returns the identities of the tables in this container.
    pub fn table_refs(&self) -> Vec<TableRef> {
        self.tables.iter().map(WireTable::table_ref).collect()
    }

    /// Encodes this container to CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a container from CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::decode(e.to_string()))
    }
}
