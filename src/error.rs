//! Error types for zero-bolt.

use thiserror::Error;

use crate::prepared::BatchOutcome;
use crate::wire::WireError;

/// Result type for zero-bolt operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for zero-bolt.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller passed an argument outside the accepted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state (closed handle,
    /// terminal transaction, concurrent autocommit transaction, ...).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Column label or ordinal does not exist in the result.
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// The server rejected a query; the surrounding transaction is failed
    /// but the connection remains usable.
    #[error("Transaction failed: {message}")]
    TransactionFailed {
        /// Server failure code, when one was reported.
        code: Option<String>,
        /// Human-readable failure message.
        message: String,
    },

    /// The connection is no longer usable and must be discarded.
    #[error("Connection is no longer usable: {0}")]
    ConnectionFatal(String),

    /// A query did not complete within the configured timeout.
    #[error("Query did not complete within the timeout")]
    QueryTimeout,

    /// A value could not be coerced to the requested type.
    #[error("Column {column}: {source}")]
    TypeCoercion {
        /// Column label or ordinal the getter was called with.
        column: String,
        /// What went wrong with the coercion.
        source: CoercionError,
    },

    /// A batch execution failed part-way through.
    #[error("Batch execution failed after {} completed entries: {source}", .partial.len())]
    BatchFailed {
        /// Outcomes of the entries that completed before the failure.
        partial: Vec<BatchOutcome>,
        /// The error raised by the failing entry.
        source: Box<Error>,
    },

    /// Local I/O error (e.g. the driver runtime could not be started).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the operation may succeed when retried in a fresh
    /// transaction on the same connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionFailed { .. } | Error::QueryTimeout)
    }

    /// Returns true if the error indicates the connection is broken and
    /// cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::ConnectionFatal(_) | Error::Io(_) => true,
            Error::BatchFailed { source, .. } => source.is_connection_broken(),
            _ => false,
        }
    }

    /// Server failure code if this is a server-reported failure.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Error::TransactionFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn coercion(column: impl Into<String>, source: CoercionError) -> Self {
        Error::TypeCoercion {
            column: column.into(),
            source,
        }
    }

    pub(crate) fn closed(what: &str) -> Self {
        Error::IllegalState(format!("{what} is closed"))
    }
}

/// Why a [`crate::Value`] could not be converted to the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// The value's type family is incompatible with the requested type.
    #[error("cannot coerce {actual} to {expected}")]
    TypeMismatch {
        /// Requested Rust type.
        expected: &'static str,
        /// Actual value type.
        actual: &'static str,
    },

    /// The conversion exists but would silently change the value.
    #[error("coercing {value} to {target} would lose precision")]
    LossyCoercion {
        /// Rendering of the offending value.
        value: String,
        /// Requested Rust type.
        target: &'static str,
    },
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Server { code, message } => Error::TransactionFailed {
                code: Some(code),
                message,
            },
            WireError::Ignored => Error::TransactionFailed {
                code: None,
                message: "the server ignored the request".into(),
            },
            WireError::Io(e) => Error::ConnectionFatal(e.to_string()),
            WireError::Protocol(msg) => Error::ConnectionFatal(msg),
            WireError::ConnectionClosed => Error::ConnectionFatal("connection closed".into()),
        }
    }
}
