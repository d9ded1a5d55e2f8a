//! The versioned document store contract.

use crate::error::StorageResult;
use crate::version::{DocumentId, Revision, StoredVersion};
use std::collections::VecDeque;

/// Predicate applied to each version during a [`Scan`].
pub type ScanFilter<'a> = Box<dyn Fn(&DocumentId, &StoredVersion) -> bool + Send + 'a>;

/// Durable storage of document versions, addressed by collection, id and
/// the version's `valid_from` revision.
///
/// Implementations synchronize internally; every method takes `&self` so a
/// store can be shared behind an `Arc` by concurrent transactions.
///
/// # Invariants
///
/// - `versions` returns a document's versions ordered by `valid_from`
/// - `put_version` on an existing `(collection, id, valid_from)` replaces it
/// - once `sync` returns, every completed write survives a crash
pub trait DocumentStore: Send + Sync {
    /// Stores `version`, replacing any version with the same `valid_from`.
    ///
    /// # Errors
    ///
    /// Fails if the range is malformed or the write cannot be persisted.
    fn put_version(&self, collection: &str, id: &DocumentId, version: StoredVersion) -> StorageResult<()>;

    /// Returns the version starting exactly at `valid_from`.
    ///
    /// # Errors
    ///
    /// Fails if the version cannot be read back.
    fn version(
        &self,
        collection: &str,
        id: &DocumentId,
        valid_from: Revision,
    ) -> StorageResult<Option<StoredVersion>>;

    /// Returns every stored version of a document, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if a version cannot be read back.
    fn versions(&self, collection: &str, id: &DocumentId) -> StorageResult<Vec<StoredVersion>>;

    /// Physically removes one version. Returns whether it existed.
    ///
    /// Only garbage collection and commit cleanup call this.
    ///
    /// # Errors
    ///
    /// Fails if the removal cannot be persisted.
    fn delete_version(&self, collection: &str, id: &DocumentId, valid_from: Revision) -> StorageResult<bool>;

    /// Ids with at least one stored version in `collection`, in id order.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be read.
    fn ids(&self, collection: &str) -> StorageResult<Vec<DocumentId>>;

    /// Names of all collections holding at least one version.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be read.
    fn collections(&self) -> StorageResult<Vec<String>>;

    /// Makes every completed write durable.
    ///
    /// # Errors
    ///
    /// Fails if the backing medium cannot be synced.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the version whose range contains `revision`, looking only at
    /// the interval bounds.
    ///
    /// # Errors
    ///
    /// Fails if the versions cannot be read.
    fn get_version(
        &self,
        collection: &str,
        id: &DocumentId,
        revision: Revision,
    ) -> StorageResult<Option<StoredVersion>> {
        Ok(self
            .versions(collection, id)?
            .into_iter()
            .rev()
            .find(|v| v.range.contains(revision)))
    }
}

impl<'s> dyn DocumentStore + 's {
    /// Lazily iterates over the versions of `collection` accepted by
    /// `filter`, in id order then `valid_from` order.
    ///
    /// The id list is captured when the scan starts; versions are fetched as
    /// the scan advances. [`Scan::restart`] replays the same id list.
    ///
    /// # Errors
    ///
    /// Fails if the id list cannot be read.
    pub fn scan<'a>(&'a self, collection: &str, filter: ScanFilter<'a>) -> StorageResult<Scan<'a>> {
        let ids = self.ids(collection)?;
        Ok(Scan {
            store: self,
            collection: collection.to_string(),
            ids,
            cursor: 0,
            buffered: VecDeque::new(),
            filter,
        })
    }
}

/// Iterator returned by `<dyn DocumentStore>::scan`.
pub struct Scan<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    ids: Vec<DocumentId>,
    cursor: usize,
    buffered: VecDeque<(DocumentId, StoredVersion)>,
    filter: ScanFilter<'a>,
}

impl Scan<'_> {
    /// Rewinds to the first id captured when the scan was created.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.buffered.clear();
    }
}

impl Iterator for Scan<'_> {
    type Item = StorageResult<(DocumentId, StoredVersion)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            let id = self.ids.get(self.cursor)?.clone();
            self.cursor += 1;
            match self.store.versions(&self.collection, &id) {
                Ok(versions) => self.buffered.extend(
                    versions
                        .into_iter()
                        .filter(|v| (self.filter)(&id, v))
                        .map(|v| (id.clone(), v)),
                ),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
