//! Connector error types.

use thiserror::Error;

/// Invalid connector configuration, reported when the connector is configured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown transport '{0}'")]
    UnknownTransport(String),

    #[error("unknown format '{0}'")]
    UnknownFormat(String),

    #[error("{kind}: unknown parameter '{key}'")]
    UnknownParameter { kind: String, key: String },

    #[error("{kind}: missing required parameter '{key}'")]
    MissingParameter { kind: String, key: String },

    #[error("{kind}: invalid value for '{key}': {reason}")]
    InvalidParameter {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("connector name '{0}' is already in use")]
    DuplicateName(String),

    #[error("unsupported connector configuration: {0}")]
    Unsupported(String),
}

/// Failure of a transport endpoint while connecting, reading or writing.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("connector {0} is not attached to a running pipeline")]
    NotAttached(String),

    #[error("connector closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A single input record that could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("column '{column}': {reason}")]
    Field { column: String, reason: String },

    #[error("column '{0}' is NOT NULL but the record has no value")]
    NullViolation(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl RecordError {
    pub fn field(column: &str, reason: impl ToString) -> Self {
        RecordError::Field {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }
}
