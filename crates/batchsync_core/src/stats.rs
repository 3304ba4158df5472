//! Per-table change counts of a selection pass.

use crate::schema::TableRef;
use serde::{Deserialize, Serialize};

/// Changes selected from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// The table.
    pub table: TableRef,
    /// Rows selected as inserts or updates.
    pub upserts: u64,
    /// Rows selected as deletes.
    pub deletes: u64,
}

impl TableChangesSelected {
    /// Creates an empty record for a table.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            upserts: 0,
            deletes: 0,
        }
    }

    /// Returns upserts plus deletes.
    pub fn total(&self) -> u64 {
        self.upserts + self.deletes
    }
}

/// Changes selected by a whole pass.
///
/// Only tables that produced at least one change are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table records, in scan order.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Records a table if it has any change.
    pub fn record(&mut self, table: TableChangesSelected) {
        if table.total() > 0 {
            self.tables.push(table);
        }
    }

    /// Returns the record of a table.
    pub fn table(&self, table: &TableRef) -> Option<&TableChangesSelected> {
        self.tables.iter().find(|t| &t.table == table)
    }

    /// Returns the upserts across all tables.
    pub fn total_upserts(&self) -> u64 {
        self.tables.iter().map(|t| t.upserts).sum()
    }

    /// Returns the deletes across all tables.
    pub fn total_deletes(&self) -> u64 {
        self.tables.iter().map(|t| t.deletes).sum()
    }

    /// Returns all changes across all tables.
    pub fn total_changes(&self) -> u64 {
        self.total_upserts() + self.total_deletes()
    }
}
