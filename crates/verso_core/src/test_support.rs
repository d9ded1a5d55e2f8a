//! Helpers shared by unit tests.

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use verso_storage::{
    DocumentId, DocumentStore, MemoryStore, Revision, StorageError, StorageResult, StoredVersion,
};

/// A store call, as recorded by [`FlakyStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreOp {
    Put(String),
    Delete(String),
    Sync,
}

type PutHook = Box<dyn FnOnce() + Send>;

/// A memory store whose writes can be made to fail on demand.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    failing_syncs: AtomicBool,
    failing_deletes: AtomicBool,
    failing_collection: Mutex<Option<String>>,
    hook: Mutex<Option<(String, PutHook)>>,
    journal: Mutex<Vec<StoreOp>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails every put, delete and sync.
    pub(crate) fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails syncs only.
    pub(crate) fn fail_syncs(&self, failing: bool) {
        self.failing_syncs.store(failing, Ordering::SeqCst);
    }

    /// Fails deletes only.
    pub(crate) fn fail_deletes(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }

    /// Fails puts into `collection` only.
    pub(crate) fn fail_puts_into(&self, collection: Option<&str>) {
        *self.failing_collection.lock() = collection.map(str::to_string);
    }

    /// Runs `hook` once, before the next put into `collection` is applied.
    pub(crate) fn before_put_into(&self, collection: &str, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some((collection.to_string(), Box::new(hook)));
    }

    /// Successful calls so far, oldest first.
    pub(crate) fn journal(&self) -> Vec<StoreOp> {
        self.journal.lock().clone()
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(())
    }

    fn run_hook(&self, collection: &str) {
        let hook = {
            let mut slot = self.hook.lock();
            match slot.as_ref() {
                Some((wanted, _)) if wanted == collection => slot.take(),
                _ => None,
            }
        };
        if let Some((_, hook)) = hook {
            hook();
        }
    }
}

fn injected() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl DocumentStore for FlakyStore {
    fn put_version(&self, collection: &str, id: &DocumentId, version: StoredVersion) -> StorageResult<()> {
        self.check()?;
        if self.failing_collection.lock().as_deref() == Some(collection) {
            return Err(injected());
        }
        self.run_hook(collection);
        self.inner.put_version(collection, id, version)?;
        self.journal.lock().push(StoreOp::Put(collection.to_string()));
        Ok(())
    }

    fn version(
        &self,
        collection: &str,
        id: &DocumentId,
        valid_from: Revision,
    ) -> StorageResult<Option<StoredVersion>> {
        self.inner.version(collection, id, valid_from)
    }

    fn versions(&self, collection: &str, id: &DocumentId) -> StorageResult<Vec<StoredVersion>> {
        self.inner.versions(collection, id)
    }

    fn delete_version(&self, collection: &str, id: &DocumentId, valid_from: Revision) -> StorageResult<bool> {
        self.check()?;
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let deleted = self.inner.delete_version(collection, id, valid_from)?;
        self.journal.lock().push(StoreOp::Delete(collection.to_string()));
        Ok(deleted)
    }

    fn ids(&self, collection: &str) -> StorageResult<Vec<DocumentId>> {
        self.inner.ids(collection)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        self.inner.collections()
    }

    fn sync(&self) -> StorageResult<()> {
        self.check()?;
        if self.failing_syncs.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.journal.lock().push(StoreOp::Sync);
        Ok(())
    }
}
