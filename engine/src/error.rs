//! Error types for the Carry sync reconciler.

use crate::{RecordId, SchemaVersion, TableName};
use thiserror::Error;

/// Failures reported by the storage collaborator.
///
/// These are surfaced to callers unchanged, wrapped in [`Error::Storage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("record not found: {table}/{id}")]
    RecordNotFound { table: TableName, id: RecordId },

    #[error("record already exists: {table}/{id}")]
    RecordAlreadyExists { table: TableName, id: RecordId },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("backend failure: {0}")]
    Backend(String),
}

/// All possible errors from the sync reconciler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },

    #[error("corrupt sync metadata: {0}")]
    CorruptMetadata(String),
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for storage collaborator calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
