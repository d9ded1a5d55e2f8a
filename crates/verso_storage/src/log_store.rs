//! Log-structured document store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::mem_store::check_range;
use crate::record::{read_frame, Frame, LogRecord};
use crate::store::DocumentStore;
use crate::version::{DocumentId, Revision, StoredVersion};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// collection -> id -> valid_from -> offset of the latest `Put` frame.
type OffsetIndex = BTreeMap<String, BTreeMap<DocumentId, BTreeMap<Revision, u64>>>;

/// Outcome of [`LogStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Number of live versions carried over.
    pub live_versions: usize,
}

/// A [`DocumentStore`] persisted as an append-only log on a
/// [`StorageBackend`].
///
/// Every write appends one checksummed frame. An in-memory index maps each
/// version to the offset of its latest frame and is rebuilt by replaying the
/// log on open. Rewriting a version (closing its range) appends a new frame;
/// deleting one appends a `Delete` frame. [`LogStore::compact`] drops
/// superseded frames.
///
/// Lock order is index, then backend.
pub struct LogStore {
    index: RwLock<OffsetIndex>,
    backend: RwLock<Box<dyn StorageBackend>>,
}

impl LogStore {
    /// Opens a store over `backend`, replaying any existing log.
    ///
    /// A torn frame at the tail is cut off so later appends start on a frame
    /// boundary.
    ///
    /// # Errors
    ///
    /// Fails if a frame before the tail is corrupt or cannot be decoded.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let size = backend.size()?;
        let mut index = OffsetIndex::new();
        let mut offset = 0;
        let mut records = 0usize;

        while offset < size {
            match read_frame(backend.as_ref(), offset, size)? {
                Frame::Record(record, len) => {
                    apply(&mut index, record, offset);
                    offset += len;
                    records += 1;
                }
                Frame::Torn => {
                    warn!(offset, size, "dropping torn record at end of store log");
                    backend.truncate(offset)?;
                    break;
                }
            }
        }

        debug!(records, bytes = offset, "replayed store log");
        Ok(Self {
            index: RwLock::new(index),
            backend: RwLock::new(backend),
        })
    }

    /// Current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn log_size(&self) -> StorageResult<u64> {
        self.backend.read().size()
    }

    /// Rewrites the log so it holds exactly one frame per live version.
    ///
    /// # Errors
    ///
    /// Fails if a live frame cannot be read or the rewrite cannot be made
    /// durable. On failure the old log stays in place.
    pub fn compact(&self) -> StorageResult<CompactionStats> {
        let mut index = self.index.write();
        let mut backend = self.backend.write();
        let bytes_before = backend.size()?;

        let mut data = Vec::new();
        let mut rebuilt = OffsetIndex::new();
        let mut live_versions = 0;
        for (collection, docs) in index.iter() {
            for (id, versions) in docs {
                for (valid_from, &offset) in versions {
                    let record = LogRecord::Put {
                        collection: collection.clone(),
                        id: id.clone(),
                        version: read_version(backend.as_ref(), offset)?,
                    };
                    rebuilt
                        .entry(collection.clone())
                        .or_default()
                        .entry(id.clone())
                        .or_default()
                        .insert(*valid_from, data.len() as u64);
                    data.extend_from_slice(&record.encode()?);
                    live_versions += 1;
                }
            }
        }

        backend.rewrite(&data)?;
        *index = rebuilt;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: data.len() as u64,
            live_versions,
        };
        debug!(?stats, "compacted store log");
        Ok(stats)
    }

    fn append(&self, record: &LogRecord) -> StorageResult<u64> {
        let frame = record.encode()?;
        let mut backend = self.backend.write();
        let offset = backend.append(&frame)?;
        backend.flush()?;
        Ok(offset)
    }
}

fn apply(index: &mut OffsetIndex, record: LogRecord, offset: u64) {
    match record {
        LogRecord::Put {
            collection,
            id,
            version,
        } => {
            index
                .entry(collection)
                .or_default()
                .entry(id)
                .or_default()
                .insert(version.range.valid_from, offset);
        }
        LogRecord::Delete {
            collection,
            id,
            valid_from,
        } => remove_entry(index, &collection, &id, valid_from),
    }
}

fn remove_entry(index: &mut OffsetIndex, collection: &str, id: &DocumentId, valid_from: Revision) {
    let Some(docs) = index.get_mut(collection) else {
        return;
    };
    if let Some(versions) = docs.get_mut(id) {
        versions.remove(&valid_from);
        if versions.is_empty() {
            docs.remove(id);
        }
    }
    if docs.is_empty() {
        index.remove(collection);
    }
}

fn read_version(backend: &dyn StorageBackend, offset: u64) -> StorageResult<StoredVersion> {
    let size = backend.size()?;
    match read_frame(backend, offset, size)? {
        Frame::Record(LogRecord::Put { version, .. }, _) => Ok(version),
        Frame::Record(LogRecord::Delete { .. }, _) => Err(StorageError::corrupted(format!(
            "index points at a delete frame at offset {offset}"
        ))),
        Frame::Torn => Err(StorageError::corrupted(format!(
            "index points past the end of the log at offset {offset}"
        ))),
    }
}

impl DocumentStore for LogStore {
    fn put_version(&self, collection: &str, id: &DocumentId, version: StoredVersion) -> StorageResult<()> {
        check_range(&version)?;
        let valid_from = version.range.valid_from;
        let record = LogRecord::Put {
            collection: collection.to_string(),
            id: id.clone(),
            version,
        };

        let mut index = self.index.write();
        let offset = self.append(&record)?;
        index
            .entry(collection.to_string())
            .or_default()
            .entry(id.clone())
            .or_default()
            .insert(valid_from, offset);
        Ok(())
    }

    fn version(
        &self,
        collection: &str,
        id: &DocumentId,
        valid_from: Revision,
    ) -> StorageResult<Option<StoredVersion>> {
        let index = self.index.read();
        let Some(&offset) = index
            .get(collection)
            .and_then(|docs| docs.get(id))
            .and_then(|versions| versions.get(&valid_from))
        else {
            return Ok(None);
        };
        let backend = self.backend.read();
        read_version(backend.as_ref(), offset).map(Some)
    }

    fn versions(&self, collection: &str, id: &DocumentId) -> StorageResult<Vec<StoredVersion>> {
        let index = self.index.read();
        let Some(versions) = index.get(collection).and_then(|docs| docs.get(id)) else {
            return Ok(Vec::new());
        };
        let backend = self.backend.read();
        versions
            .values()
            .map(|&offset| read_version(backend.as_ref(), offset))
            .collect()
    }

    fn delete_version(&self, collection: &str, id: &DocumentId, valid_from: Revision) -> StorageResult<bool> {
        let mut index = self.index.write();
        let exists = index
            .get(collection)
            .and_then(|docs| docs.get(id))
            .is_some_and(|versions| versions.contains_key(&valid_from));
        if !exists {
            return Ok(false);
        }

        self.append(&LogRecord::Delete {
            collection: collection.to_string(),
            id: id.clone(),
            valid_from,
        })?;
        remove_entry(&mut index, collection, id, valid_from);
        Ok(true)
    }

    fn ids(&self, collection: &str) -> StorageResult<Vec<DocumentId>> {
        Ok(self
            .index
            .read()
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(self.index.read().keys().cloned().collect())
    }

    fn sync(&self) -> StorageResult<()> {
        self.backend.write().sync()
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("collections", &self.index.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileBackend;
    use crate::memory::InMemoryBackend;
    use crate::version::VersionRange;
    use serde_json::json;
    use tempfile::tempdir;

    fn live(from: u64, value: i64) -> StoredVersion {
        StoredVersion::live(VersionRange::open(Revision::new(from)), from, "main", json!({ "v": value }))
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let id = DocumentId::from("a");

        {
            let store = LogStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
            store.put_version("docs", &id, live(1, 10)).unwrap();
            let closed = StoredVersion {
                range: VersionRange::open(Revision::new(1)).closed_at(Revision::new(2)),
                ..live(1, 10)
            };
            store.put_version("docs", &id, closed).unwrap();
            store.put_version("docs", &id, live(2, 20)).unwrap();
            store.sync().unwrap();
        }

        let store = LogStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        let versions = store.versions("docs", &id).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].range.valid_to, Some(Revision::new(2)));
        assert_eq!(versions[1].document, Some(json!({ "v": 20 })));
    }

    #[test]
    fn deletes_are_replayed() {
        let backend = InMemoryBackend::new();
        let store = LogStore::open(Box::new(backend)).unwrap();
        let id = DocumentId::from("a");
        store.put_version("docs", &id, live(1, 1)).unwrap();
        store.put_version("docs", &id, live(2, 2)).unwrap();
        assert!(store.delete_version("docs", &id, Revision::new(1)).unwrap());
        assert!(!store.delete_version("docs", &id, Revision::new(1)).unwrap());

        let log = {
            let backend = store.backend.read();
            let size = backend.size().unwrap();
            backend.read_at(0, size as usize).unwrap()
        };
        let reopened = LogStore::open(Box::new(InMemoryBackend::with_data(log))).unwrap();
        let froms: Vec<Revision> = reopened
            .versions("docs", &id)
            .unwrap()
            .iter()
            .map(|v| v.range.valid_from)
            .collect();
        assert_eq!(froms, vec![Revision::new(2)]);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let first = LogRecord::Put {
            collection: "docs".into(),
            id: DocumentId::from("a"),
            version: live(1, 1),
        }
        .encode()
        .unwrap();
        let second = LogRecord::Put {
            collection: "docs".into(),
            id: DocumentId::from("b"),
            version: live(2, 2),
        }
        .encode()
        .unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second[..second.len() / 2]);

        let store = LogStore::open(Box::new(InMemoryBackend::with_data(data))).unwrap();
        assert_eq!(store.log_size().unwrap(), first.len() as u64);
        assert_eq!(store.ids("docs").unwrap(), vec![DocumentId::from("a")]);

        store.put_version("docs", &DocumentId::from("c"), live(3, 3)).unwrap();
        assert_eq!(store.ids("docs").unwrap().len(), 2);
    }

    #[test]
    fn compaction_keeps_only_live_frames() {
        let store = LogStore::open(Box::new(InMemoryBackend::new())).unwrap();
        let id = DocumentId::from("a");
        for rev in 1..=5 {
            store.put_version("docs", &id, live(rev, rev as i64)).unwrap();
        }
        for rev in 1..=4 {
            store.delete_version("docs", &id, Revision::new(rev)).unwrap();
        }

        let stats = store.compact().unwrap();
        assert_eq!(stats.live_versions, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(store.log_size().unwrap(), stats.bytes_after);
        assert_eq!(
            store.version("docs", &id, Revision::new(5)).unwrap().unwrap().document,
            Some(json!({ "v": 5 }))
        );
    }
}
