use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

/// Custom Result type for propdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for propdb
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed SQL, `position` is a byte offset into the input
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Positional parameter count mismatch
    #[error("bind error: {0}")]
    Bind(String),

    /// Unknown or ambiguous column, bad column list
    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Primary key or NOT NULL violation
    #[error("constraint failed: {0}")]
    Constraint(String),

    #[error("subquery cardinality: {0}")]
    SubqueryCardinality(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("cannot drop primary key column {column} of table {table}")]
    PrimaryKeyDrop { table: String, column: String },

    /// Persistence layout exceeds the configured storage budget
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Serialized data is inconsistent or unreadable
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Internal error (storage, invariant breakage)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            position,
            message: message.into(),
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error::TypeMismatch(value.to_string())
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error::TypeMismatch(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::CorruptData(value.to_string())
    }
}
