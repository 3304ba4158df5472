//! Changed rows.

use crate::schema::wire::encoded_row_len;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// How a row changed since the requester's watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// The row was inserted or updated and must be upserted.
    Modified,
    /// The row was deleted; it travels as a tombstone.
    Deleted,
}

/// A changed row: one value per table column, in column order.
///
/// Rows are only produced by materializing a source cursor or by importing
/// a wire container, so the value count always matches the owning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Value>,
    state: RowState,
}

impl Row {
    /// Creates a row of nulls for a table with `width` columns.
    pub(crate) fn empty(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
            state: RowState::Modified,
        }
    }

    pub(crate) fn from_parts(values: Vec<Value>, state: RowState) -> Self {
        Self { values, state }
    }

    /// Returns the row state.
    pub fn state(&self) -> RowState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RowState) {
        self.state = state;
    }

    /// Returns the value at a column position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub(crate) fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Returns all values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns true if this row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.state == RowState::Deleted
    }

    /// Size of this row once written to a part file, in bytes.
    pub fn encoded_len(&self) -> u64 {
        encoded_row_len(self.state, &self.values)
    }
}
