//! Error types for meter-sync.

use std::path::PathBuf;
use std::time::Duration;

use meter_types::ParseError;

use crate::crypto::CryptoError;

/// Errors from fetching the remote topology snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The target URL is not usable.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The remote service could not be reached.
    #[error("Remote service not reachable at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete in time.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The remote service answered with a non-success status.
    #[error("Remote service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not JSON.
    #[error("Malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The snapshot envelope or one of its records did not decode.
    #[error("Failed to decode snapshot: {0}")]
    Decode(#[from] ParseError),
}

impl FetchError {
    /// Whether the caller may retry the fetch.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from a full fetch-and-reconcile pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to reconcile topology: {0}")]
    Store(#[from] meter_store::Error),
}

impl SyncError {
    /// Whether retrying the whole pass may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Fetch(e) => e.is_retryable(),
            SyncError::Store(e) => e.is_retryable(),
        }
    }
}

/// Errors raised by a backup destination.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    /// Network failure talking to the destination.
    #[error("Destination not reachable at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A destination request did not complete in time.
    #[error("Destination request to {url} timed out")]
    Timeout { url: String },

    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination refused a request.
    #[error("Destination rejected {operation} ({status}): {message}")]
    Rejected {
        operation: String,
        status: u16,
        message: String,
    },

    /// The destination's sync cursor could not be read.
    #[error("Corrupt sync cursor at {location}: {value:?}")]
    CorruptCursor { location: String, value: String },

    /// The destination could not be configured.
    #[error("Invalid destination: {0}")]
    Invalid(String),
}

impl DestinationError {
    /// Map a reqwest failure, separating timeouts.
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            DestinationError::Timeout {
                url: url.to_string(),
            }
        } else {
            DestinationError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Whether the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            DestinationError::Transport { .. } | DestinationError::Timeout { .. } => true,
            DestinationError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from a backup run or a single sensor export.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Store error: {0}")]
    Store(#[from] meter_store::Error),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error("Encryption failed: {0}")]
    Encryption(CryptoError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] csv::Error),

    /// The stored key is not base64 of 32 bytes.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// A sensor export exceeded its time budget.
    #[error("Export of sensor {sensor_id} timed out after {after:?}")]
    Timeout { sensor_id: i64, after: Duration },
}

impl From<CryptoError> for BackupError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(reason) => BackupError::InvalidKey(reason),
            other => BackupError::Encryption(other),
        }
    }
}

impl BackupError {
    /// Whether a later run may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackupError::Store(e) => e.is_retryable(),
            BackupError::Destination(e) => e.is_retryable(),
            BackupError::Timeout { .. } => true,
            _ => false,
        }
    }
}
