//! Error types for meter-store.

use std::path::PathBuf;

use rusqlite::ErrorCode;

/// Result type for meter-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in meter-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A lookup by id found nothing.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// An insert collided with an existing key.
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: i64 },

    /// A concurrent or constraint-violating write. Retry the whole operation.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Map a write failure for a single record insert.
pub(crate) fn insert_error(err: rusqlite::Error, kind: &'static str, id: i64) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => Error::AlreadyExists { kind, id },
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::Conflict(err.to_string())
        }
        _ => Error::Database(err),
    }
}

/// Map a write failure inside a batch; constraint violations become conflicts.
pub(crate) fn batch_error(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::ConstraintViolation | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked,
        ) => Error::Conflict(err.to_string()),
        _ => Error::Database(err),
    }
}
