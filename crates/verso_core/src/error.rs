//! Error types for Verso core.

use std::io;
use thiserror::Error;
use verso_storage::DocumentId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Verso core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] verso_storage::StorageError),

    /// A document could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error outside the document store (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A branch, commit or document does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The name or id that was missing.
        name: String,
    },

    /// A branch with this name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// What was being created.
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// A commit touched a document that a concurrent commit already changed.
    #[error("write conflict on {collection}/{id}")]
    WriteConflict {
        /// Collection of the conflicting document.
        collection: String,
        /// Id of the conflicting document.
        id: DocumentId,
    },

    /// A branch head moved between reading it and swapping it.
    #[error("branch head moved: {branch}")]
    StaleHead {
        /// The contended branch.
        branch: String,
    },

    /// The commit kept losing the head race and gave up.
    #[error("branch {branch} is busy: gave up after {attempts} attempts")]
    Busy {
        /// The contended branch.
        branch: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Persisted engine state is inconsistent.
    #[error("corrupt state: {message}")]
    CorruptState {
        /// Description of the inconsistency.
        message: String,
    },

    /// The revision counter can no longer guarantee unique revisions.
    ///
    /// Once raised, every later commit fails with this error until the
    /// database is reopened.
    #[error("fatal: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(kind: &'static str, name: impl ToString) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(kind: &'static str, name: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }

    /// Creates a corrupt state error.
    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Whether retrying the same transaction from a fresh snapshot may
    /// succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict { .. } | Self::StaleHead { .. } | Self::Busy { .. }
        )
    }
}
