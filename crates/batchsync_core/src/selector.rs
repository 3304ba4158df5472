//! Incremental change selection.
//!
//! The selector walks the tables of a schema one at a time, pulls changed
//! rows from the data source and accumulates them. When batching is on, the
//! accumulated rows are flushed into a new batch part as soon as their total
//! size passes the threshold. The remainder is flushed last, after which the
//! batch tail is fixed so only the final part is marked last.
//!
//! ```text
//!   tables ─► eligible? ─► resolve command ─► cursor ─► rows ─► size check
//!                                                              │
//!                                          over threshold ◄────┘
//!                                                │
//!                                  Batch::append_changes(.., false)
//! ```

use crate::batch::Batch;
use crate::config::{
    CancelFlag, EncodedRowSize, RowSizeEstimator, SelectionConfig, SyncContext, SyncParameters,
    SyncType, SyncWay,
};
use crate::error::{CoreError, CoreResult};
use crate::schema::{ChangeSchema, Row, RowState, SchemaTable, SyncDirection, TableFilter};
use crate::source::{
    ChangesQuery, DataSource, NoopInterceptor, OutdatedAction, SelectCommand, SelectionInterceptor,
    SourceRecord, OWNER_COLUMN, TOMBSTONE_COLUMN,
};
use crate::stats::{DatabaseChangesSelected, TableChangesSelected};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Returns the `is_new` flag and watermark a leg should query with.
///
/// Reinitializing the upload leg replays it from scratch, while
/// `ReinitializeWithUpload` still uploads incrementally. On the download leg
/// both reinitializing types replay from scratch.
pub fn effective_watermark(
    way: SyncWay,
    sync_type: SyncType,
    is_new: bool,
    last_timestamp: u64,
) -> (bool, u64) {
    let replay = match way {
        SyncWay::Upload => sync_type == SyncType::Reinitialize,
        SyncWay::Download => sync_type != SyncType::Normal,
    };
    if replay {
        (true, 0)
    } else {
        (is_new, last_timestamp)
    }
}

/// Returns true if a table takes part in the given leg.
pub fn is_eligible(way: SyncWay, direction: SyncDirection) -> bool {
    !matches!(
        (way, direction),
        (SyncWay::Upload, SyncDirection::DownloadOnly)
            | (SyncWay::Download, SyncDirection::UploadOnly)
    )
}

/// Binds each filter parameter to the context value of the same name.
///
/// Names are compared ignoring ASCII case. Unmatched parameters bind to
/// [`Value::Null`].
pub fn bind_filter_parameters(
    filter: &TableFilter,
    parameters: &SyncParameters,
) -> Vec<(String, Value)> {
    filter
        .parameters()
        .iter()
        .map(|p| {
            let value = parameters
                .get(&p.name)
                .map_or(Value::Null, |bound| bound.value.clone());
            (p.name.clone(), value)
        })
        .collect()
}

/// Turns a cursor record into a row of `table`.
///
/// The tombstone field sets the row state and is not copied. The owner
/// field is dropped. Every other field must be a column of the table.
pub fn materialize_row(table: &SchemaTable, record: SourceRecord) -> CoreResult<Row> {
    let mut row = table.new_row();
    let mut tombstone = false;

    for (name, value) in record.into_fields() {
        if name == TOMBSTONE_COLUMN {
            tombstone = value.is_truthy();
            continue;
        }
        if name == OWNER_COLUMN {
            continue;
        }
        table.set_field(&mut row, &name, value)?;
    }

    row.set_state(if tombstone {
        RowState::Deleted
    } else {
        RowState::Modified
    });
    Ok(row)
}

/// Drops a batch left incomplete by a failed pass, deleting its directory.
pub(crate) fn discard(batch: &mut Batch, error: &CoreError) {
    if let Some(directory) = batch.directory_full_path() {
        warn!(
            directory = %directory.display(),
            parts = batch.parts().len(),
            error = %error,
            "discarding incomplete batch"
        );
    }
    batch.destroy(true);
}

/// Query settings shared by every table of one scan.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanSettings {
    pub(crate) is_new: bool,
    pub(crate) last_timestamp: u64,
    pub(crate) excluding_scope_id: Option<Uuid>,
    /// Flush threshold in bytes; 0 never flushes.
    pub(crate) batch_size: u64,
}

/// Flush state carried across the tables of one scan.
struct Accumulator<'s> {
    schema: &'s ChangeSchema,
    changes: ChangeSchema,
    index: u32,
}

impl Accumulator<'_> {
    fn flush(&mut self, batch: &mut Batch, table: &SchemaTable) -> CoreResult<()> {
        let full = std::mem::replace(&mut self.changes, self.schema.clone_structure(false));
        debug!(
            table = %table.table_ref(),
            index = self.index,
            rows = full.row_count(),
            "flushing batch part"
        );
        batch.append_changes(full, self.index, false)?;
        self.index += 1;
        self.changes.ensure_table_shell(table);
        Ok(())
    }
}

/// Selects changed rows from a data source into a [`Batch`].
pub struct ChangeSelector<S: DataSource> {
    source: Arc<S>,
    interceptor: Arc<dyn SelectionInterceptor>,
    estimator: Box<dyn RowSizeEstimator>,
    cancel: CancelFlag,
}

impl<S: DataSource> ChangeSelector<S> {
    /// Creates a selector with no-op hooks and encoded-size estimation.
    pub fn new(source: S) -> Self {
        Self::from_shared(Arc::new(source))
    }

    /// Creates a selector over a shared source.
    pub fn from_shared(source: Arc<S>) -> Self {
        Self {
            source,
            interceptor: Arc::new(NoopInterceptor),
            estimator: Box::new(EncodedRowSize),
            cancel: CancelFlag::new(),
        }
    }

    /// Sets the interceptor.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn SelectionInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Sets the row size estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: impl RowSizeEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Uses an existing cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the data source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the cancellation flag.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Selects the changes of every eligible table.
    ///
    /// `context.sync_type` may be escalated if the source turns out to be
    /// out of date and the interceptor chooses to reinitialize. With a zero
    /// batch size the result is a single in-memory batch; otherwise parts are
    /// written under `config.batch_directory`.
    pub fn select_changes(
        &self,
        context: &mut SyncContext,
        schema: &ChangeSchema,
        config: &SelectionConfig,
    ) -> CoreResult<(Batch, DatabaseChangesSelected)> {
        if context.way == SyncWay::Upload && context.sync_type == SyncType::Reinitialize {
            info!("upload leg is reinitializing, nothing to select");
            return self.empty_changes(schema);
        }

        self.check_outdated(context, config)?;

        let mut batch = if config.is_batched() {
            Batch::on_disk(schema, &config.batch_directory, None)
        } else {
            Batch::in_memory(schema)
        };

        let tables: Vec<&SchemaTable> = schema
            .tables()
            .iter()
            .filter(|t| is_eligible(context.way, t.direction()))
            .collect();

        let settings = ScanSettings {
            is_new: config.is_new,
            last_timestamp: config.last_timestamp,
            excluding_scope_id: config.excluding_scope_id,
            batch_size: config.batch_size,
        };

        let stats = match self.scan(context, schema, &tables, settings, &mut batch) {
            Ok(stats) => stats,
            Err(e) => {
                discard(&mut batch, &e);
                return Err(e);
            }
        };

        info!(
            way = ?context.way,
            sync_type = ?context.sync_type,
            tables = stats.tables.len(),
            upserts = stats.total_upserts(),
            deletes = stats.total_deletes(),
            parts = batch.parts().len(),
            "changes selected"
        );

        Ok((batch, stats))
    }

    fn empty_changes(&self, schema: &ChangeSchema) -> CoreResult<(Batch, DatabaseChangesSelected)> {
        let mut batch = Batch::in_memory(schema);
        batch.append_changes(schema.clone_structure(false), 0, true)?;
        Ok((batch, DatabaseChangesSelected::default()))
    }

    fn check_outdated(&self, context: &mut SyncContext, config: &SelectionConfig) -> CoreResult<()> {
        if config.is_new {
            return Ok(());
        }
        let Some(boundary) = self.source.retained_history_boundary()? else {
            return Ok(());
        };
        if boundary <= config.last_timestamp {
            return Ok(());
        }

        match self.interceptor.outdated(context) {
            OutdatedAction::Rollback => Err(CoreError::OutOfDate {
                boundary,
                watermark: config.last_timestamp,
            }),
            action => {
                context.sync_type = if action == OutdatedAction::Reinitialize {
                    SyncType::Reinitialize
                } else {
                    SyncType::ReinitializeWithUpload
                };
                warn!(
                    boundary,
                    watermark = config.last_timestamp,
                    sync_type = ?context.sync_type,
                    "source is out of date, escalating"
                );
                Ok(())
            }
        }
    }

    /// Scans `tables` in order into `batch`, then flushes the remainder as
    /// the last part and fixes the batch tail.
    pub(crate) fn scan(
        &self,
        context: &SyncContext,
        schema: &ChangeSchema,
        tables: &[&SchemaTable],
        settings: ScanSettings,
        batch: &mut Batch,
    ) -> CoreResult<DatabaseChangesSelected> {
        let mut stats = DatabaseChangesSelected::default();
        let mut acc = Accumulator {
            schema,
            changes: schema.clone_structure(false),
            index: 0,
        };

        for table in tables {
            self.cancel.check()?;
            self.interceptor
                .table_changes_selecting(context, table.table_ref());

            let query = self.build_query(context, schema, table, settings)?;
            let selected = self.scan_table(table, &query, settings.batch_size, &mut acc, batch)?;

            self.interceptor.table_changes_selected(context, &selected);
            stats.record(selected);
        }

        if acc.changes.has_tables() {
            debug!(index = acc.index, rows = acc.changes.row_count(), "flushing last batch part");
            batch.append_changes(acc.changes, acc.index, true)?;
        }
        batch.finalize_tail();

        Ok(stats)
    }

    fn build_query(
        &self,
        context: &SyncContext,
        schema: &ChangeSchema,
        table: &SchemaTable,
        settings: ScanSettings,
    ) -> CoreResult<ChangesQuery> {
        let filter = if self.source.can_be_server() {
            schema.filter_for(table.table_ref())
        } else {
            None
        };

        let command = SelectCommand::resolve(settings.is_new, filter);
        let kind = command.kind();
        if !self.source.supports(table.table_ref(), kind) {
            return Err(CoreError::missing_command(
                table.table_ref().to_string(),
                kind.name(),
            ));
        }

        let (is_new, last_timestamp) = effective_watermark(
            context.way,
            context.sync_type,
            settings.is_new,
            settings.last_timestamp,
        );

        let parameters = command
            .filter()
            .map(|f| bind_filter_parameters(f, &context.parameters))
            .unwrap_or_default();

        Ok(ChangesQuery {
            table: table.table_ref().clone(),
            command,
            is_new,
            last_timestamp,
            excluding_scope_id: settings.excluding_scope_id,
            parameters,
        })
    }

    fn scan_table(
        &self,
        table: &SchemaTable,
        query: &ChangesQuery,
        batch_size: u64,
        acc: &mut Accumulator<'_>,
        batch: &mut Batch,
    ) -> CoreResult<TableChangesSelected> {
        let mut selected = TableChangesSelected::new(table.table_ref().clone());
        let mut running: u64 = 0;

        acc.changes.ensure_table_shell(table);

        for record in self.source.select_changes(query)? {
            let row = materialize_row(table, record?)?;
            let size = if batch_size > 0 {
                self.estimator.estimate(table, &row)
            } else {
                0
            };

            if batch_size > 0 && size > batch_size {
                return Err(CoreError::row_over_sized(
                    table.table_ref().to_string(),
                    size,
                    batch_size,
                ));
            }

            match row.state() {
                RowState::Deleted => selected.deletes += 1,
                RowState::Modified => selected.upserts += 1,
            }
            acc.changes.ensure_table_shell(table).push_row(row);

            if batch_size == 0 {
                continue;
            }
            running += size;
            if running > batch_size {
                acc.flush(batch, table)?;
                running = 0;
            }
        }

        debug!(
            table = %table.table_ref(),
            command = %query.command.kind(),
            upserts = selected.upserts,
            deletes = selected.deletes,
            "table scanned"
        );

        Ok(selected)
    }
}
