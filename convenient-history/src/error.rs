//! Error types for history and incremental input operations

use std::path::PathBuf;

/// Errors raised while reading or writing execution history.
///
/// A missing entry is never an error: loaders return `Ok(None)` for that case,
/// so an I/O failure can always be told apart from "no previous execution".
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Underlying filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entry exists but cannot be trusted
    #[error("Corrupt history entry {path}: {reason}")]
    Corrupt {
        /// File holding the entry
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Could not acquire the per-entry write lock
    #[error("Lock error: {0}")]
    Lock(String),

    /// A digest string was not valid lowercase SHA-256 hex
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Outputs could not be fingerprinted after execution
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors raised while capturing a snapshot before execution.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A declared input property has no value
    #[error("No value has been specified for input property '{0}'")]
    MissingValue(String),

    /// A value was supplied for a property the task does not declare
    #[error("Input property '{0}' is not declared by the task")]
    UndeclaredValue(String),

    /// Value could not be serialized for hashing
    #[error("Cannot snapshot value of input property '{property}': {source}")]
    Value {
        /// Property name
        property: String,
        /// Serialization failure
        #[source]
        source: serde_json::Error,
    },

    /// Files of a property could not be fingerprinted
    #[error("Cannot fingerprint files of property '{property}': {source}")]
    Fingerprint {
        /// Property name
        property: String,
        /// I/O failure
        #[source]
        source: std::io::Error,
    },
}

/// Misuse of a stateful incremental input view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncrementalInputsError {
    /// `out_of_date` was called more than once
    #[error("out_of_date() can only be called once per task execution")]
    OutOfDateAlreadyVisited,

    /// `removed` was called before `out_of_date`
    #[error("removed() must be called after out_of_date()")]
    RemovedBeforeOutOfDate,

    /// `removed` was called more than once
    #[error("removed() can only be called once per task execution")]
    RemovedAlreadyVisited,
}
