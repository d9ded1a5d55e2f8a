//! Document store kept in ordered in-memory maps.

use crate::error::{StorageError, StorageResult};
use crate::store::DocumentStore;
use crate::version::{DocumentId, Revision, StoredVersion};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Versions = BTreeMap<Revision, StoredVersion>;
type Collection = BTreeMap<DocumentId, Versions>;

/// A [`DocumentStore`] that never touches disk.
///
/// Used for ephemeral databases and tests. `sync` is a no-op.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored versions across all collections.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.collections
            .read()
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }
}

pub(crate) fn check_range(version: &StoredVersion) -> StorageResult<()> {
    if version.range.is_valid() {
        return Ok(());
    }
    Err(StorageError::InvalidRange {
        valid_from: version.range.valid_from.as_u64(),
        valid_to: version.range.valid_to.map_or(u64::MAX, Revision::as_u64),
    })
}

impl DocumentStore for MemoryStore {
    fn put_version(&self, collection: &str, id: &DocumentId, version: StoredVersion) -> StorageResult<()> {
        check_range(&version)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .entry(id.clone())
            .or_default()
            .insert(version.range.valid_from, version);
        Ok(())
    }

    fn version(
        &self,
        collection: &str,
        id: &DocumentId,
        valid_from: Revision,
    ) -> StorageResult<Option<StoredVersion>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .and_then(|v| v.get(&valid_from))
            .cloned())
    }

    fn versions(&self, collection: &str, id: &DocumentId) -> StorageResult<Vec<StoredVersion>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_version(&self, collection: &str, id: &DocumentId, valid_from: Revision) -> StorageResult<bool> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(versions) = docs.get_mut(id) else {
            return Ok(false);
        };
        let existed = versions.remove(&valid_from).is_some();
        if versions.is_empty() {
            docs.remove(id);
        }
        if docs.is_empty() {
            collections.remove(collection);
        }
        Ok(existed)
    }

    fn ids(&self, collection: &str) -> StorageResult<Vec<DocumentId>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
