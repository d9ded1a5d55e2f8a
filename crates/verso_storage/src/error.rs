//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by byte backends and document stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A stored record failed validation.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A record could not be serialized.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A record could not be deserialized.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// A version was written with a range that cannot hold.
    #[error("invalid version range: valid_from {valid_from}, valid_to {valid_to}")]
    InvalidRange {
        /// Lower bound of the offending range.
        valid_from: u64,
        /// Upper bound of the offending range.
        valid_to: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
