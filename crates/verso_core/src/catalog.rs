//! Engine records kept in reserved collections of the document store.
//!
//! ```text
//! _meta       format version, revision high-water mark, pruned floor
//! _commits    one record per commit node, keyed by commit id
//! _branches   one record per branch, keyed by name
//! ```
//!
//! Records are stored as a single version over the whole revision range and
//! overwritten in place.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use verso_storage::{DocumentId, DocumentStore, Revision, StoredVersion, VersionRange};

pub(crate) const META: &str = "_meta";
pub(crate) const COMMITS: &str = "_commits";
pub(crate) const BRANCHES: &str = "_branches";

pub(crate) const FORMAT_VERSION_KEY: &str = "format_version";
pub(crate) const HIGH_WATER_KEY: &str = "revision_high_water";
pub(crate) const PRUNED_BELOW_KEY: &str = "pruned_below";

/// Whether `collection` belongs to the engine.
pub(crate) fn is_reserved(collection: &str) -> bool {
    collection.starts_with('_')
}

/// Rejects collection names user transactions may not touch.
pub(crate) fn check_user_collection(collection: &str) -> CoreResult<()> {
    if collection.is_empty() {
        return Err(CoreError::invalid_operation("collection name is empty"));
    }
    if is_reserved(collection) {
        return Err(CoreError::invalid_operation(format!(
            "collection name is reserved: {collection}"
        )));
    }
    Ok(())
}

pub(crate) fn write<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    value: &T,
) -> CoreResult<()> {
    let document = serde_json::to_value(value)?;
    store.put_version(
        collection,
        &DocumentId::new(key),
        StoredVersion::live(VersionRange::always(), 0, "", document),
    )?;
    Ok(())
}

pub(crate) fn read<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> CoreResult<Option<T>> {
    let id = DocumentId::new(key);
    match store.version(collection, &id, Revision::ZERO)? {
        Some(StoredVersion {
            document: Some(document),
            ..
        }) => decode(collection, &id, document).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn read_all<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> CoreResult<Vec<(DocumentId, T)>> {
    let mut records = Vec::new();
    for id in store.ids(collection)? {
        if let Some(StoredVersion {
            document: Some(document),
            ..
        }) = store.version(collection, &id, Revision::ZERO)?
        {
            let value = decode(collection, &id, document)?;
            records.push((id, value));
        }
    }
    Ok(records)
}

pub(crate) fn remove(store: &dyn DocumentStore, collection: &str, key: &str) -> CoreResult<bool> {
    Ok(store.delete_version(collection, &DocumentId::new(key), Revision::ZERO)?)
}

fn decode<T: DeserializeOwned>(collection: &str, id: &DocumentId, document: serde_json::Value) -> CoreResult<T> {
    serde_json::from_value(document)
        .map_err(|e| CoreError::corrupt_state(format!("unreadable record {collection}/{id}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_storage::MemoryStore;

    #[test]
    fn records_overwrite_in_place() {
        let store = MemoryStore::new();
        write(&store, META, HIGH_WATER_KEY, &3u64).unwrap();
        write(&store, META, HIGH_WATER_KEY, &7u64).unwrap();
        assert_eq!(read::<u64>(&store, META, HIGH_WATER_KEY).unwrap(), Some(7));
        assert_eq!(store.version_count(), 1);
    }

    #[test]
    fn undecodable_record_is_corrupt_state() {
        let store = MemoryStore::new();
        write(&store, META, HIGH_WATER_KEY, &"not a number").unwrap();
        assert!(matches!(
            read::<u64>(&store, META, HIGH_WATER_KEY),
            Err(CoreError::CorruptState { .. })
        ));
    }

    #[test]
    fn user_collections_cannot_start_with_underscore() {
        assert!(check_user_collection("docs").is_ok());
        assert!(check_user_collection("_commits").is_err());
        assert!(check_user_collection("").is_err());
    }
}
