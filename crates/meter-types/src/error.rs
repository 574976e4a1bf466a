//! Error types for decoding meter4 records.

use thiserror::Error;

/// Errors that can occur when decoding topology records or reading payloads.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The element is not a JSON object.
    #[error("{kind} must be a JSON object")]
    NotAnObject { kind: &'static str },

    /// A required field is absent.
    #[error("{kind}: missing field `{field}`")]
    MissingField { kind: &'static str, field: String },

    /// A field not declared for this record kind was present.
    #[error("{kind}: unknown field `{field}`")]
    UnknownField { kind: &'static str, field: String },

    /// A field is present but has the wrong shape.
    #[error("{kind}: invalid value for `{field}`: {reason}")]
    InvalidField {
        kind: &'static str,
        field: String,
        reason: String,
    },

    /// A timestamp or date did not match the expected format.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias using meter-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
