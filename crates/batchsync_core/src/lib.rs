//! # Batchsync Core
//!
//! Change batching and snapshot engine for batchsync.
//!
//! This crate provides:
//! - A change schema: tables, columns, filters and relations plus the rows
//!   held per table
//! - Batches of changed rows, held in memory or split into part files
//! - Incremental change selection with size-bounded flushing
//! - Parameter-scoped snapshots with a JSON manifest
//!
//! ## Architecture
//!
//! A pass walks the eligible tables of a schema one at a time. Rows pulled
//! from the [`DataSource`] cursor accumulate in a working copy of the
//! schema. Whenever their estimated size passes the batch threshold they are
//! written out as the next [`BatchPart`], so peak memory stays around one
//! part. After the last table the remainder is written as the final part.
//!
//! ## Key Invariants
//!
//! - Part indices are dense, `0..N` in creation order
//! - Exactly one part is marked last, and it has the highest index
//! - A row is never split across parts
//! - Reading a batch keeps at most one part in memory

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod error;
mod schema;
mod selector;
mod snapshot;
mod source;
mod stats;
mod value;

pub use batch::{
    generate_directory_name, part_file_name, Batch, BatchManifest, BatchPart, LoadedPart,
    PartDescriptor, TableFragments, MANIFEST_FILE, MAX_PART_INDEX, PART_EXTENSION,
};
pub use config::{
    CancelFlag, EncodedRowSize, RowSizeEstimator, SelectionConfig, SyncContext, SyncParameter,
    SyncParameters, SyncType, SyncWay,
};
pub use error::{CoreError, CoreResult};
pub use schema::{
    ChangeSchema, Column, FilterParameter, ObjectNaming, Row, RowState, SchemaId, SchemaRelation,
    SchemaTable, SyncDirection, TableFilter, TableRef, WireContainer, WireRow, WireTable,
    DEFAULT_SCOPE_NAME,
};
pub use selector::{
    bind_filter_parameters, effective_watermark, is_eligible, materialize_row, ChangeSelector,
};
pub use snapshot::{
    get_snapshot, snapshot_directory, snapshot_directory_name, SnapshotBuilder, ALL_DIRECTORY,
};
pub use source::{
    ChangesQuery, CommandKind, DataSource, MemoryDataSource, MemoryRecord, NoopInterceptor,
    OutdatedAction, RecordCursor, SelectCommand, SelectionInterceptor, SourceRecord, OWNER_COLUMN,
    TOMBSTONE_COLUMN,
};
pub use stats::{DatabaseChangesSelected, TableChangesSelected};
pub use value::Value;
