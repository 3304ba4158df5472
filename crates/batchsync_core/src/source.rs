//! Collaborators of a selection pass.
//!
//! A [`DataSource`] answers change queries with a cursor of
//! [`SourceRecord`]s. A [`SelectionInterceptor`] is told about each table as
//! it is scanned and decides what to do when the source is out of date.
//! [`MemoryDataSource`] is a complete in-memory source for tests and tools.

use crate::config::SyncContext;
use crate::error::CoreResult;
use crate::schema::{TableFilter, TableRef};
use crate::stats::TableChangesSelected;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use uuid::Uuid;

/// Field flagging a record as a delete.
pub const TOMBSTONE_COLUMN: &str = "sync_row_is_tombstone";

/// Field carrying the scope id of the last writer of a record.
pub const OWNER_COLUMN: &str = "update_scope_id";

/// The four shapes of change query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Changes after a watermark.
    SelectChanges,
    /// Changes after a watermark, restricted by a filter.
    SelectChangesWithFilters,
    /// Every live row, for a first synchronization.
    SelectInitializedChanges,
    /// Every live row matching a filter, for a first synchronization.
    SelectInitializedChangesWithFilters,
}

impl CommandKind {
    /// All kinds.
    pub const ALL: [CommandKind; 4] = [
        CommandKind::SelectChanges,
        CommandKind::SelectChangesWithFilters,
        CommandKind::SelectInitializedChanges,
        CommandKind::SelectInitializedChangesWithFilters,
    ];

    /// Returns the name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::SelectChanges => "SelectChanges",
            CommandKind::SelectChangesWithFilters => "SelectChangesWithFilters",
            CommandKind::SelectInitializedChanges => "SelectInitializedChanges",
            CommandKind::SelectInitializedChangesWithFilters => {
                "SelectInitializedChangesWithFilters"
            }
        }
    }

    /// Returns true for the first-synchronization kinds.
    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            CommandKind::SelectInitializedChanges | CommandKind::SelectInitializedChangesWithFilters
        )
    }

    /// Returns true for the filtered kinds.
    pub fn is_filtered(self) -> bool {
        matches!(
            self,
            CommandKind::SelectChangesWithFilters | CommandKind::SelectInitializedChangesWithFilters
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The change query to run for one table, resolved once before scanning.
#[derive(Debug, Clone)]
pub enum SelectCommand {
    /// Changes after a watermark.
    Changes,
    /// Changes after a watermark, restricted by a filter.
    ChangesWithFilters(TableFilter),
    /// Every live row.
    InitializedChanges,
    /// Every live row matching a filter.
    InitializedChangesWithFilters(TableFilter),
}

impl SelectCommand {
    /// Picks the command for a first or incremental sync, with or without a
    /// filter.
    pub fn resolve(is_new: bool, filter: Option<&TableFilter>) -> Self {
        match (is_new, filter) {
            (true, Some(f)) => SelectCommand::InitializedChangesWithFilters(f.clone()),
            (true, None) => SelectCommand::InitializedChanges,
            (false, Some(f)) => SelectCommand::ChangesWithFilters(f.clone()),
            (false, None) => SelectCommand::Changes,
        }
    }

    /// Returns the shape of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            SelectCommand::Changes => CommandKind::SelectChanges,
            SelectCommand::ChangesWithFilters(_) => CommandKind::SelectChangesWithFilters,
            SelectCommand::InitializedChanges => CommandKind::SelectInitializedChanges,
            SelectCommand::InitializedChangesWithFilters(_) => {
                CommandKind::SelectInitializedChangesWithFilters
            }
        }
    }

    /// Returns the filter of a filtered command.
    pub fn filter(&self) -> Option<&TableFilter> {
        match self {
            SelectCommand::ChangesWithFilters(f) | SelectCommand::InitializedChangesWithFilters(f) => {
                Some(f)
            }
            SelectCommand::Changes | SelectCommand::InitializedChanges => None,
        }
    }
}

/// Everything a data source needs to run a change query for one table.
#[derive(Debug, Clone)]
pub struct ChangesQuery {
    /// Table to scan.
    pub table: TableRef,
    /// Query shape.
    pub command: SelectCommand,
    /// Whether the requester is treated as new for this leg.
    pub is_new: bool,
    /// Only changes strictly after this watermark are wanted.
    pub last_timestamp: u64,
    /// Changes last written by this scope are not wanted.
    pub excluding_scope_id: Option<Uuid>,
    /// Filter parameter values, in filter declaration order.
    pub parameters: Vec<(String, Value)>,
}

/// One row as produced by a data source cursor: named fields in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRecord {
    fields: Vec<(String, Value)>,
}

impl SourceRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Adds a field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Returns a field value, matching the name ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Returns the fields in order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Consumes the record, returning its fields.
    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for SourceRecord {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// A pull cursor over the records of a change query.
pub type RecordCursor<'a> = Box<dyn Iterator<Item = CoreResult<SourceRecord>> + 'a>;

/// A database that can report its changed rows.
///
/// Query construction is the source's business; the selector only picks the
/// query shape and binds values.
pub trait DataSource: Send + Sync {
    /// Returns true if this source may act as the server side.
    ///
    /// Filters are only applied by sources that can.
    fn can_be_server(&self) -> bool;

    /// Returns the oldest watermark the source still has history for, or
    /// `None` if history is never cleaned up.
    fn retained_history_boundary(&self) -> CoreResult<Option<u64>>;

    /// Returns the current watermark of the source.
    fn current_timestamp(&self) -> CoreResult<u64>;

    /// Returns true if the source can run a query of `kind` for `table`.
    fn supports(&self, table: &TableRef, kind: CommandKind) -> bool;

    /// Runs a change query.
    fn select_changes(&self, query: &ChangesQuery) -> CoreResult<RecordCursor<'_>>;
}

/// Decision taken when the source no longer has history back to the
/// requester's watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutdatedAction {
    /// Abort the pass.
    #[default]
    Rollback,
    /// Continue as a reinitialization.
    Reinitialize,
    /// Continue as a reinitialization after uploading.
    ReinitializeWithUpload,
}

/// Hooks invoked during a selection pass.
///
/// Every method has a no-op default.
pub trait SelectionInterceptor: Send + Sync {
    /// Called at most once per pass when the source is out of date.
    fn outdated(&self, _context: &SyncContext) -> OutdatedAction {
        OutdatedAction::Rollback
    }

    /// Called before a table is scanned.
    fn table_changes_selecting(&self, _context: &SyncContext, _table: &TableRef) {}

    /// Called after a table is scanned, even if it had no changes.
    fn table_changes_selected(&self, _context: &SyncContext, _changes: &TableChangesSelected) {}
}

/// Interceptor that does nothing and rolls back outdated passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterceptor;

impl SelectionInterceptor for NoopInterceptor {}

/// A record held by [`MemoryDataSource`].
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    /// Table the record belongs to.
    pub table: TableRef,
    /// Watermark of the last change.
    pub timestamp: u64,
    /// Whether the row was deleted.
    pub tombstone: bool,
    /// Scope that last wrote the row, `None` for the source itself.
    pub owner: Option<Uuid>,
    /// Column values.
    pub fields: SourceRecord,
}

/// An in-memory data source.
///
/// Incremental queries return records changed after the watermark,
/// tombstones included, except those last written by the excluding scope.
/// Queries for a new requester return live rows only. Filter parameters are
/// matched against the field of the same name; a null value matches
/// everything. Every query is logged.
#[derive(Debug)]
pub struct MemoryDataSource {
    can_be_server: bool,
    history_boundary: Option<u64>,
    current_timestamp: Option<u64>,
    unsupported: Vec<(TableRef, CommandKind)>,
    records: Vec<MemoryRecord>,
    queries: Mutex<Vec<ChangesQuery>>,
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataSource {
    /// Creates an empty source that can act as a server.
    pub fn new() -> Self {
        Self {
            can_be_server: true,
            history_boundary: None,
            current_timestamp: None,
            unsupported: Vec::new(),
            records: Vec::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Sets whether the source can act as a server.
    #[must_use]
    pub fn with_server_role(mut self, can_be_server: bool) -> Self {
        self.can_be_server = can_be_server;
        self
    }

    /// Sets the oldest watermark the source has history for.
    #[must_use]
    pub fn with_history_boundary(mut self, boundary: u64) -> Self {
        self.history_boundary = Some(boundary);
        self
    }

    /// Pins the current watermark instead of deriving it from the records.
    #[must_use]
    pub fn with_current_timestamp(mut self, timestamp: u64) -> Self {
        self.current_timestamp = Some(timestamp);
        self
    }

    /// Removes support for one query shape on one table.
    #[must_use]
    pub fn without_command(mut self, table: TableRef, kind: CommandKind) -> Self {
        self.unsupported.push((table, kind));
        self
    }

    /// Adds a live row.
    pub fn upsert(&mut self, table: TableRef, timestamp: u64, fields: SourceRecord) {
        self.push(MemoryRecord {
            table,
            timestamp,
            tombstone: false,
            owner: None,
            fields,
        });
    }

    /// Adds a tombstone.
    pub fn delete(&mut self, table: TableRef, timestamp: u64, fields: SourceRecord) {
        self.push(MemoryRecord {
            table,
            timestamp,
            tombstone: true,
            owner: None,
            fields,
        });
    }

    /// Adds a record.
    pub fn push(&mut self, record: MemoryRecord) {
        self.records.push(record);
    }

    /// Returns the records.
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Returns a copy of every query run so far.
    pub fn queries(&self) -> Vec<ChangesQuery> {
        self.queries.lock().clone()
    }

    /// Returns the number of queries run so far.
    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    fn selects(&self, record: &MemoryRecord, query: &ChangesQuery) -> bool {
        if !record.table.matches(&query.table, false) || record.timestamp <= query.last_timestamp {
            return false;
        }

        let initial = query.is_new || query.command.kind().is_initialized();
        if initial && record.tombstone {
            return false;
        }
        if !initial && record.owner.is_some() && record.owner == query.excluding_scope_id {
            return false;
        }

        query.parameters.iter().all(|(name, value)| {
            value.is_null() || record.fields.get(name).is_some_and(|field| field == value)
        })
    }
}

impl DataSource for MemoryDataSource {
    fn can_be_server(&self) -> bool {
        self.can_be_server
    }

    fn retained_history_boundary(&self) -> CoreResult<Option<u64>> {
        Ok(self.history_boundary)
    }

    fn current_timestamp(&self) -> CoreResult<u64> {
        Ok(self.current_timestamp.unwrap_or_else(|| {
            self.records.iter().map(|r| r.timestamp).max().unwrap_or(0)
        }))
    }

    fn supports(&self, table: &TableRef, kind: CommandKind) -> bool {
        !self
            .unsupported
            .iter()
            .any(|(t, k)| *k == kind && t.matches(table, false))
    }

    fn select_changes(&self, query: &ChangesQuery) -> CoreResult<RecordCursor<'_>> {
        self.queries.lock().push(query.clone());

        let mut selected: Vec<&MemoryRecord> = self
            .records
            .iter()
            .filter(|r| self.selects(r, query))
            .collect();
        selected.sort_by_key(|r| r.timestamp);

        let rows: Vec<SourceRecord> = selected
            .into_iter()
            .map(|r| {
                let owner = r.owner.map(|id| Value::Text(id.to_string()));
                r.fields
                    .clone()
                    .with(TOMBSTONE_COLUMN, i64::from(r.tombstone))
                    .with(OWNER_COLUMN, owner)
            })
            .collect();

        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}
