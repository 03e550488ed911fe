//! Error types for SagaLog core.

use crate::entry::CodecError;
use crate::log_id::SagaLogId;
use crate::pool::SagaLogOwner;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SagaLog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] sagalog_storage::StorageError),

    /// A stored record could not be decoded into an entry.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error outside the storage backend (directory listing, deletion).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing or invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A log id could not be composed or parsed.
    #[error("invalid saga log id: {message}")]
    InvalidLogId {
        /// Description of the problem.
        message: String,
    },

    /// An entry violates the entry model invariants.
    #[error("invalid entry: {message}")]
    InvalidEntry {
        /// Description of the violated invariant.
        message: String,
    },

    /// The log is owned by someone else.
    #[error("saga log {log_id} is owned by {held_by}, cannot be acquired by {requested_by}")]
    OwnershipConflict {
        /// The contested log.
        log_id: SagaLogId,
        /// The owner that asked for the log.
        requested_by: SagaLogOwner,
        /// The owner currently holding the log.
        held_by: SagaLogOwner,
    },

    /// Every id up to `u64::MAX` has been handed out, so no id can be
    /// generated. Entries with caller-supplied ids are still accepted.
    #[error("entry id space exhausted for saga log {log_id}")]
    IdSpaceExhausted {
        /// The exhausted log.
        log_id: SagaLogId,
    },

    /// The log has been closed.
    #[error("saga log is closed")]
    LogClosed,
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid log id error.
    pub fn invalid_log_id(message: impl Into<String>) -> Self {
        Self::InvalidLogId {
            message: message.into(),
        }
    }

    /// Creates an invalid entry error.
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            message: message.into(),
        }
    }

    /// Returns true if this is an ownership conflict.
    #[must_use]
    pub fn is_ownership_conflict(&self) -> bool {
        matches!(self, Self::OwnershipConflict { .. })
    }
}
