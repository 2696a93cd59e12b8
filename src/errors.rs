//! Error types for ordmap.

use crate::engine::{EngineError, TxnId};
use thiserror::Error;

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by map, iterator and index operations.
///
/// The retry policy matches on this enum exhaustively: `Deadlock` is the only
/// variant ever retried, and only when the failing operation owned its own
/// implicit transaction. Everything else is fatal to the current operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine detected a lock cycle. `txn` carries the caller's explicit
    /// transaction when one was active, so the caller can decide whether to
    /// retry the whole transaction.
    #[error("deadlock detected")]
    Deadlock { txn: Option<TxnId> },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Index names are persisted in a NUL-delimited catalog row, so they must
    /// be non-empty and NUL-free.
    #[error("invalid index name: {0:?}")]
    InvalidIndexName(String),

    #[error("index '{0}' is already attached to a map")]
    IndexAttached(String),

    #[error("map name '{0}' is reserved")]
    ReservedMap(String),

    #[error("operation is not allowed while a transaction is active")]
    TransactionActive,

    #[error("map '{0}' is still open")]
    MapOpen(String),

    #[error("map '{0}' is closed")]
    MapClosed(String),

    #[error("cursor is read-only")]
    ReadOnlyCursor,

    #[error("cursor position no longer exists")]
    InvalidPosition,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<EngineError> for StoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Deadlock => StoreError::Deadlock { txn: None },
            EngineError::InvalidPosition => StoreError::InvalidPosition,
            // Not-found and key-exists are handled at the call sites where
            // they are part of the operation contract; reaching this
            // conversion means the engine reported one unexpectedly.
            EngineError::NotFound => StoreError::Storage("unexpected not-found from engine".into()),
            EngineError::KeyExists => StoreError::Storage("unexpected key-exists from engine".into()),
            EngineError::BufferTooSmall { key_len, value_len } => StoreError::Storage(format!(
                "unexpected buffer-too-small from engine (key {key_len} bytes, value {value_len} bytes)"
            )),
            EngineError::Other(msg) => StoreError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_conversion_preserves_class() {
        let err: StoreError = EngineError::Deadlock.into();
        assert!(matches!(err, StoreError::Deadlock { txn: None }));
    }

    #[test]
    fn other_engine_failures_become_storage_errors() {
        let err: StoreError = EngineError::Other("disk on fire".into()).into();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
