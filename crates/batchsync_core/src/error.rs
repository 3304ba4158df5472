//! Error types for the batching engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while selecting, batching or rehydrating changes.
///
/// Every variant is fatal to the current pass. Nothing here is retried
/// internally; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The source no longer retains history back to the requested watermark
    /// and the outdated hook declined to reinitialize.
    #[error("source is out of date: history boundary {boundary} is past watermark {watermark}")]
    OutOfDate {
        /// Oldest watermark the source can still serve.
        boundary: u64,
        /// Watermark supplied by the requester.
        watermark: u64,
    },

    /// A single row is larger than the configured batch size.
    #[error("row in table {table} is {size} bytes, larger than the batch size of {limit} bytes")]
    RowOverSized {
        /// Table the row belongs to.
        table: String,
        /// Estimated size of the row.
        size: u64,
        /// Configured batch size.
        limit: u64,
    },

    /// The data source has no select command for the requested shape.
    #[error("missing command {command} for table {table}")]
    MissingCommand {
        /// Table being scanned.
        table: String,
        /// Name of the command shape.
        command: String,
    },

    /// More batch parts than the three-digit file naming allows.
    #[error("batch overflow: part index {index} exceeds 999")]
    BatchOverflow {
        /// The rejected part index.
        index: u32,
    },

    /// A wire payload references a table that the schema does not define.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Qualified table name.
        table: String,
    },

    /// A cursor produced a field that the table does not define.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Qualified table name.
        table: String,
        /// Column name reported by the cursor.
        column: String,
    },

    /// The pass was cancelled between two tables.
    #[error("selection cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A batch part could not be encoded.
    #[error("part encoding failed: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// A batch part could not be decoded.
    #[error("part decoding failed: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// The manifest could not be serialized or parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest parsed but violates the batch layout rules.
    #[error("invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the violation.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an oversized row error.
    pub fn row_over_sized(table: impl Into<String>, size: u64, limit: u64) -> Self {
        Self::RowOverSized {
            table: table.into(),
            size,
            limit,
        }
    }

    /// Creates a missing command error.
    pub fn missing_command(table: impl Into<String>, command: impl Into<String>) -> Self {
        Self::MissingCommand {
            table: table.into(),
            command: command.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates an unknown column error.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an invalid manifest error.
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::row_over_sized("dbo.Customer", 4096, 1024);
        let text = err.to_string();
        assert!(text.contains("dbo.Customer"));
        assert!(text.contains("4096"));
        assert!(text.contains("1024"));

        let err = CoreError::BatchOverflow { index: 1000 };
        assert_eq!(err.to_string(), "batch overflow: part index 1000 exceeds 999");

        let err = CoreError::unknown_table("Sales.Order");
        assert_eq!(err.to_string(), "unknown table: Sales.Order");
    }

    #[test]
    fn io_errors_convert() {
        let io = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
