//! Error types for cursordb.

use std::io;
use thiserror::Error;

use crate::types::{CursorId, IndexId, ObjectStoreId, TransactionId};

/// Result type alias for cursordb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Error reported by the relational back end.
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Stored data could not be decoded.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Key is not a valid record key (NaN, nested sentinel, ...).
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key range bounds are inconsistent.
    #[error("Invalid key range: {0}")]
    InvalidKeyRange(String),

    /// Argument outside the accepted domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A unique index already maps this key to another record.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Write attempted through a read-only transaction.
    #[error("Transaction {0} is read-only")]
    ReadOnlyTransaction(TransactionId),

    /// Schema change attempted outside a version-change transaction.
    #[error("Transaction {0} is not a version-change transaction")]
    VersionChangeRequired(TransactionId),

    /// Transaction has not begun, or has already finished.
    #[error("Transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    /// Another transaction currently holds the atomic scope.
    #[error("Transaction {0} is already in progress")]
    TransactionInProgress(TransactionId),

    /// No transaction is registered under this identifier.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    /// No cursor is registered under this identifier.
    #[error("Unknown cursor: {0}")]
    UnknownCursor(CursorId),

    /// Cursor has already reached the end of its range.
    #[error("Cursor {0} has already completed")]
    CursorCompleted(CursorId),

    /// Cursor is in its terminal errored state.
    #[error("Cursor {0} has errored")]
    CursorErrored(CursorId),

    /// Object store is outside the transaction's scope.
    #[error("Object store {object_store_id} is not in the scope of transaction {transaction_id}")]
    NotInScope {
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
    },

    /// Index does not exist on the object store.
    #[error("Index {index_id} not found on object store {object_store_id}")]
    IndexNotFound {
        object_store_id: ObjectStoreId,
        index_id: IndexId,
    },

    /// Key generator reached its maximum value.
    #[error("Key generator for object store {0} is exhausted")]
    KeyGeneratorExhausted(ObjectStoreId),

    /// Key is too large.
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value is too large.
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid key error.
    pub fn invalid_key<S: Into<String>>(msg: S) -> Self {
        Error::InvalidKey(msg.into())
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check if this error reports a cursor that can no longer move.
    pub fn is_cursor_terminal(&self) -> bool {
        matches!(self, Error::CursorCompleted(_) | Error::CursorErrored(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad key tag");
        assert_eq!(format!("{}", err), "Corruption detected: bad key tag");

        let err = Error::KeyTooLarge {
            size: 1000,
            max: 100,
        };
        assert_eq!(format!("{}", err), "Key too large: 1000 bytes (max: 100)");

        let err = Error::NotInScope {
            transaction_id: 4,
            object_store_id: 9,
        };
        assert_eq!(
            format!("{}", err),
            "Object store 9 is not in the scope of transaction 4"
        );
    }

    #[test]
    fn test_error_from_sqlite() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Sqlite(_)));
    }

    #[test]
    fn test_error_classifiers() {
        assert!(Error::corruption("bad").is_corruption());
        assert!(!Error::Internal("x".into()).is_corruption());
        assert!(Error::CursorCompleted(1).is_cursor_terminal());
        assert!(Error::CursorErrored(1).is_cursor_terminal());
        assert!(!Error::UnknownCursor(1).is_cursor_terminal());
    }
}
