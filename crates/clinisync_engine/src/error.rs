//! Error types for the sync engine.

use clinisync_codec::CodecError;
use clinisync_protocol::{EntityKey, ProtocolError};
use clinisync_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Per-entity transmission failures are recorded as entity state and never
/// surface from the facade; only misuse and engine-level failures do.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A single request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The remote authority failed to process the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// No conflict exists for the entity.
    #[error("no conflict recorded for {0}")]
    NotFound(EntityKey),

    /// The engine has not been initialized.
    #[error("sync engine is not initialized")]
    NotInitialized,

    /// `initialize` was called twice.
    #[error("sync engine is already initialized")]
    AlreadyInitialized,

    /// The engine has been shut down.
    #[error("sync engine has been shut down")]
    ShutDown,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A persisted record could not be decoded.
    #[error("record error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A journal failed its integrity checks.
    #[error("journal '{journal}' corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Journal name.
        journal: String,
        /// Offset of the bad record.
        offset: u64,
        /// What failed.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store at {} is locked by another process", .0.display())]
    StoreLocked(PathBuf),

    /// Invalid configuration or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A sync task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(journal: &str, offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            journal: journal.to_string(),
            offset,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
