//! Selection configuration and synchronization context.

use crate::error::{CoreError, CoreResult};
use crate::schema::{Row, SchemaTable};
use crate::value::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The leg of a synchronization currently being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWay {
    /// The requester sends its changes upstream.
    Upload,
    /// The requester receives changes from upstream.
    Download,
}

/// Whether a leg continues from its watermark or replays from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncType {
    /// Continue from the last watermark.
    #[default]
    Normal,
    /// Replay everything, discarding local changes.
    Reinitialize,
    /// Replay everything after uploading local changes.
    ReinitializeWithUpload,
}

/// A named value bound to filter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: Value,
}

impl SyncParameter {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The filter parameter values supplied by the requester.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncParameters(Vec<SyncParameter>);

impl SyncParameters {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(SyncParameter::new(name, value));
        self
    }

    /// Adds a parameter.
    pub fn push(&mut self, parameter: SyncParameter) {
        self.0.push(parameter);
    }

    /// Finds a parameter by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SyncParameter> {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Iterates parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncParameter> {
        self.0.iter()
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<SyncParameter> for SyncParameters {
    fn from_iter<I: IntoIterator<Item = SyncParameter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// State of the synchronization session a pass runs in.
///
/// The sync type may be escalated by the selector when the source turns
/// out to be outdated and the outdated hook chooses to reinitialize.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Leg being served.
    pub way: SyncWay,
    /// Replay policy for this leg.
    pub sync_type: SyncType,
    /// Filter parameter values.
    pub parameters: SyncParameters,
}

impl SyncContext {
    /// Creates a context for a normal pass.
    pub fn new(way: SyncWay) -> Self {
        Self {
            way,
            sync_type: SyncType::Normal,
            parameters: SyncParameters::new(),
        }
    }

    /// Sets the sync type.
    #[must_use]
    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    /// Sets the filter parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: SyncParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Configuration of a single selection pass.
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Root directory under which batch directories are created.
    pub batch_directory: PathBuf,

    /// Batch size threshold in bytes (0 = batching disabled).
    pub batch_size: u64,

    /// Whether the requester has never synchronized this scope.
    pub is_new: bool,

    /// Watermark of the last changes the requester observed.
    pub last_timestamp: u64,

    /// Scope of the requester, whose own writes are not echoed back.
    pub excluding_scope_id: Option<Uuid>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            batch_directory: std::env::temp_dir().join("batchsync"),
            batch_size: 0,
            is_new: false,
            last_timestamp: 0,
            excluding_scope_id: None,
        }
    }
}

impl SelectionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch root directory.
    #[must_use]
    pub fn batch_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.batch_directory = path.into();
        self
    }

    /// Sets the batch size threshold in bytes.
    #[must_use]
    pub fn batch_size(mut self, bytes: u64) -> Self {
        self.batch_size = bytes;
        self
    }

    /// Sets whether the requester is new.
    #[must_use]
    pub fn is_new(mut self, value: bool) -> Self {
        self.is_new = value;
        self
    }

    /// Sets the requester's watermark.
    #[must_use]
    pub fn last_timestamp(mut self, value: u64) -> Self {
        self.last_timestamp = value;
        self
    }

    /// Sets the requester's scope id.
    #[must_use]
    pub fn excluding_scope_id(mut self, scope_id: Uuid) -> Self {
        self.excluding_scope_id = Some(scope_id);
        self
    }

    /// Returns true if changes are split into parts on disk.
    pub fn is_batched(&self) -> bool {
        self.batch_size > 0
    }
}

/// Estimates how many bytes a row adds to a batch part.
pub trait RowSizeEstimator: Send + Sync {
    /// Returns the size of `row`, in the unit of the batch size threshold.
    fn estimate(&self, table: &SchemaTable, row: &Row) -> u64;
}

/// Measures a row by the length of its CBOR wire encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedRowSize;

impl RowSizeEstimator for EncodedRowSize {
    fn estimate(&self, _table: &SchemaTable, row: &Row) -> u64 {
        row.encoded_len()
    }
}

/// Shared flag used to cancel a pass between two tables.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SelectionConfig::default();
        assert_eq!(config.batch_size, 0);
        assert!(!config.is_batched());
        assert!(!config.is_new);
        assert!(config.excluding_scope_id.is_none());
    }

    #[test]
    fn builder_pattern() {
        let scope = Uuid::new_v4();
        let config = SelectionConfig::new()
            .batch_directory("/tmp/batches")
            .batch_size(4096)
            .is_new(true)
            .last_timestamp(77)
            .excluding_scope_id(scope);

        assert_eq!(config.batch_directory, PathBuf::from("/tmp/batches"));
        assert!(config.is_batched());
        assert!(config.is_new);
        assert_eq!(config.last_timestamp, 77);
        assert_eq!(config.excluding_scope_id, Some(scope));
    }

    #[test]
    fn parameters_lookup_ignores_case() {
        let params = SyncParameters::new().with("Region", "EU").with("Tier", 3);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("region").map(|p| &p.value), Some(&Value::from("EU")));
        assert!(params.get("missing").is_none());
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());

        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(CoreError::Cancelled)));

        flag.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn encoded_row_size_is_wire_length() {
        let table = SchemaTable::new("T", None)
            .with_column(crate::schema::Column::new("Id", "int"))
            .with_column(crate::schema::Column::new("Name", "text"))
            .with_column(crate::schema::Column::new("Note", "text"));
        let mut row = table.new_row();
        table.set_field(&mut row, "Id", Value::Integer(1)).unwrap();
        table.set_field(&mut row, "Name", Value::from("abc")).unwrap();

        let wire = crate::schema::WireRow {
            state: row.state(),
            values: row.values().to_vec(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&wire, &mut bytes).unwrap();

        assert_eq!(EncodedRowSize.estimate(&table, &row), bytes.len() as u64);
    }

    #[test]
    fn context_builder() {
        let ctx = SyncContext::new(SyncWay::Download)
            .with_sync_type(SyncType::ReinitializeWithUpload)
            .with_parameters(SyncParameters::new().with("Region", "EU"));
        assert_eq!(ctx.way, SyncWay::Download);
        assert_eq!(ctx.sync_type, SyncType::ReinitializeWithUpload);
        assert!(!ctx.parameters.is_empty());
    }
}
