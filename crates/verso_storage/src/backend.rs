//! Byte-level backend trait.

use crate::error::StorageResult;

/// An append-only byte store underneath a [`crate::LogStore`].
///
/// Backends do not interpret what they hold. The log store owns record
/// framing, checksums and indexing; the backend only moves bytes.
///
/// # Invariants
///
/// - `append` returns the offset of the first written byte
/// - `read_at` returns exactly the bytes written at that offset
/// - after `sync` returns, everything appended so far survives a crash
/// - `rewrite` replaces the whole contents or leaves them untouched
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with `ReadPastEnd` if the range is not fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store back to `new_size` bytes.
    ///
    /// Used to drop a torn record at the tail after a crash.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents with `data`.
    ///
    /// Used by log compaction. A crash during `rewrite` must leave either the
    /// old or the new contents, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be made durable.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
