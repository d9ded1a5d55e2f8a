//! Transaction manager.

use crate::catalog::check_user_collection;
use crate::config::Config;
use crate::counter::RevisionCounter;
use crate::error::{CoreError, CoreResult};
use crate::graph::CommitGraph;
use crate::registry::BranchRegistry;
use crate::transaction::state::{PendingWrite, Transaction};
use crate::transaction::tracker::{OpenSet, SnapshotTracker};
use crate::types::{CommitId, DocumentKey, Revision, TransactionId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use verso_storage::{Document, DocumentId, DocumentStore, ScanFilter, StoredVersion, VersionRange};

/// Index of the version visible from a snapshot whose reachable commits are
/// `ancestors`: the reachable version with the greatest `valid_from`.
///
/// `versions` must be ordered by `valid_from`.
pub(crate) fn visible_position(versions: &[StoredVersion], ancestors: &HashSet<CommitId>) -> Option<usize> {
    versions
        .iter()
        .rposition(|v| ancestors.contains(&CommitId::new(v.commit)))
}

/// Whether `document` has every top-level field of `example` with an equal
/// value. A non-object example must equal the document.
pub(crate) fn matches_example(document: &Document, example: &Document) -> bool {
    match (document, example) {
        (Document::Object(fields), Document::Object(wanted)) => wanted
            .iter()
            .all(|(name, value)| fields.get(name) == Some(value)),
        _ => document == example,
    }
}

/// `document` reduced to the top-level `fields` it has.
fn project(document: Document, fields: &[&str]) -> Document {
    match document {
        Document::Object(mut all) => Document::Object(
            fields
                .iter()
                .filter_map(|name| all.remove(*name).map(|value| ((*name).to_string(), value)))
                .collect(),
        ),
        other => other,
    }
}

/// Runs optimistic transactions against branch snapshots.
///
/// - Reads never block writers; a read sees the snapshot plus its own
///   buffered writes
/// - A commit checks its write set against every key changed on the branch
///   since its snapshot, then swaps the branch head
/// - A lost head swap is retried from a fresh head read; a conflict is
///   returned to the caller
pub struct TransactionManager {
    store: Arc<dyn DocumentStore>,
    graph: Arc<CommitGraph>,
    branches: Arc<BranchRegistry>,
    counter: Arc<RevisionCounter>,
    tracker: Arc<SnapshotTracker>,
    next_txid: AtomicU64,
    max_commit_retries: u32,
    sync_on_commit: bool,
}

impl TransactionManager {
    /// Creates a transaction manager over loaded engine state.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        graph: Arc<CommitGraph>,
        branches: Arc<BranchRegistry>,
        counter: Arc<RevisionCounter>,
        tracker: Arc<SnapshotTracker>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            graph,
            branches,
            counter,
            tracker,
            next_txid: AtomicU64::new(1),
            max_commit_retries: config.max_commit_retries.max(1),
            sync_on_commit: config.sync_on_commit,
        }
    }

    /// Begins a transaction on the current head of `branch`.
    pub fn begin(&self, branch: &str) -> CoreResult<Transaction> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let (guard, snapshot) = self.tracker.register(txid, branch, |_| {
            let head = self.branches.head(branch)?;
            Ok((head, self.graph.get(head)?.revision))
        })?;
        debug!(txn = %txid, branch, snapshot = %snapshot.commit, "began transaction");
        Ok(Transaction::new(snapshot, Some(guard)))
    }

    /// Begins a read-only transaction on `commit`, which need not be a
    /// branch head. Writes through it are rejected.
    pub fn begin_at(&self, commit: CommitId) -> CoreResult<Transaction> {
        self.begin_pinned(commit, |_| Ok(()))
    }

    /// Like [`TransactionManager::begin_at`], running `check` under the
    /// tracker lock before the snapshot is registered.
    pub(crate) fn begin_pinned<F>(&self, commit: CommitId, check: F) -> CoreResult<Transaction>
    where
        F: FnOnce(&OpenSet) -> CoreResult<()>,
    {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let branch = self.graph.get(commit)?.branch.clone();
        let (guard, snapshot) = self.tracker.register(txid, &branch, |open| {
            let revision = self.graph.get(commit)?.revision;
            check(open)?;
            Ok((commit, revision))
        })?;
        debug!(txn = %txid, snapshot = %commit, "began read-only transaction");
        Ok(Transaction::new(snapshot, Some(guard)).into_read_only())
    }

    /// Reads a document as the transaction sees it.
    pub fn get(&self, txn: &mut Transaction, collection: &str, id: &DocumentId) -> CoreResult<Option<Document>> {
        txn.ensure_active()?;
        check_user_collection(collection)?;
        let key = DocumentKey::new(collection, id.clone());
        if let Some(write) = txn.pending_write(&key) {
            return Ok(match write {
                PendingWrite::Put(document) => Some(document.clone()),
                PendingWrite::Remove => None,
            });
        }

        let ancestors = txn.ancestors(&self.graph)?;
        let mut versions = self.store.versions(collection, id)?;
        let version = visible_position(&versions, &ancestors).map(|i| versions.swap_remove(i));
        txn.record_read(key, version.as_ref().map(|v| v.range.valid_from));
        Ok(version.and_then(|v| v.document))
    }

    /// Every document of `collection` visible to the transaction and
    /// accepted by `filter`, in id order.
    pub fn scan(
        &self,
        txn: &mut Transaction,
        collection: &str,
        filter: &dyn Fn(&DocumentId, &Document) -> bool,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        txn.ensure_active()?;
        check_user_collection(collection)?;
        let ancestors = txn.ancestors(&self.graph)?;

        let reachable: ScanFilter<'_> = {
            let ancestors = Arc::clone(&ancestors);
            Box::new(move |_: &DocumentId, v: &StoredVersion| ancestors.contains(&CommitId::new(v.commit)))
        };
        // Versions arrive in valid_from order, so the last one kept per id
        // is the visible one.
        let mut latest: BTreeMap<DocumentId, StoredVersion> = BTreeMap::new();
        for item in self.store.as_ref().scan(collection, reachable)? {
            let (id, version) = item?;
            latest.insert(id, version);
        }

        let mut visible: BTreeMap<DocumentId, Document> = latest
            .into_iter()
            .filter_map(|(id, version)| version.document.map(|document| (id, document)))
            .collect();
        for (key, write) in txn.pending_writes() {
            if key.collection != collection {
                continue;
            }
            match write {
                PendingWrite::Put(document) => {
                    visible.insert(key.id.clone(), document.clone());
                }
                PendingWrite::Remove => {
                    visible.remove(&key.id);
                }
            }
        }

        Ok(visible
            .into_iter()
            .filter(|(id, document)| filter(id, document))
            .collect())
    }

    /// Documents matching `example` field by field.
    pub fn find(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.scan(txn, collection, &|_, document| matches_example(document, example))
    }

    /// The first document, in id order, matching `example`.
    pub fn find_one(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
    ) -> CoreResult<Option<(DocumentId, Document)>> {
        Ok(self.find(txn, collection, example)?.into_iter().next())
    }

    /// Documents matching `example`, each cut down to `fields`.
    ///
    /// Object documents keep only the listed top-level fields they have;
    /// other documents are returned whole.
    pub fn find_fields(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
        fields: &[&str],
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        Ok(self
            .find(txn, collection, example)?
            .into_iter()
            .map(|(id, document)| (id, project(document, fields)))
            .collect())
    }

    /// Buffers the removal of every visible document matching `example`.
    /// Returns how many were matched.
    pub fn remove_matching(&self, txn: &mut Transaction, collection: &str, example: &Document) -> CoreResult<usize> {
        let matched = self.find(txn, collection, example)?;
        for (id, _) in &matched {
            txn.remove(collection, id.clone())?;
        }
        Ok(matched.len())
    }

    /// Commits the transaction's writes to its branch.
    ///
    /// Returns the new commit, or the snapshot commit when nothing was
    /// written. The transaction is finished afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `WriteConflict` if a written document changed on the branch since
    ///   the snapshot
    /// - `Busy` if the head swap kept losing
    /// - `Fatal` if no revision can be allocated
    /// - `Storage` if a write or sync fails; a failed sync after the head
    ///   swap leaves the commit visible but not known to be durable
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitId> {
        txn.ensure_active()?;
        if txn.write_count() == 0 {
            txn.mark_committed();
            debug!(txn = %txn.id(), "committed read-only transaction");
            return Ok(txn.snapshot());
        }

        match self.try_commit(txn) {
            Ok(commit) => {
                debug!(txn = %txn.id(), branch = txn.branch(), commit = %commit, writes = txn.write_count(), "committed transaction");
                txn.mark_committed();
                Ok(commit)
            }
            Err(e) => {
                debug!(txn = %txn.id(), error = %e, "commit failed");
                txn.mark_aborted();
                Err(e)
            }
        }
    }

    /// Discards the transaction's writes. Finished transactions are left
    /// as they are.
    pub fn rollback(&self, txn: &mut Transaction) {
        if txn.is_active() {
            txn.mark_aborted();
            debug!(txn = %txn.id(), "rolled back transaction");
        }
    }

    /// Number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tracker.count()
    }

    fn try_commit(&self, txn: &mut Transaction) -> CoreResult<CommitId> {
        let branch = txn.branch().to_string();
        let keys: BTreeSet<DocumentKey> = txn.pending_writes().map(|(key, _)| key.clone()).collect();
        let mut revision = self.counter.next()?;

        for attempt in 1..=self.max_commit_retries {
            let head = self.branches.head(&branch)?;
            if head != txn.snapshot() {
                let touched = self.graph.touched_between(txn.snapshot(), head)?;
                if let Some(key) = keys.iter().find(|key| touched.contains(*key)) {
                    return Err(CoreError::WriteConflict {
                        collection: key.collection.clone(),
                        id: key.id.clone(),
                    });
                }
            }
            if self.graph.get(head)?.revision >= revision {
                revision = self.counter.next()?;
            }
            let commit = CommitId::for_revision(revision);
            let _pin = self.tracker.pin_commit(commit, &[head]);

            self.write_versions(txn, &branch, revision)?;
            if let Err(e) = self.graph.create_commit(&[head], &branch, revision, keys.clone()) {
                self.drop_versions(txn, revision);
                return Err(e);
            }
            if self.sync_on_commit {
                if let Err(e) = self.store.sync() {
                    self.abandon(txn, revision);
                    return Err(e.into());
                }
            }

            match self.branches.advance(&branch, head, commit) {
                Ok(()) => {
                    self.close_superseded(txn, &branch, revision);
                    if self.sync_on_commit {
                        self.store.sync()?;
                    }
                    return Ok(commit);
                }
                Err(CoreError::StaleHead { .. }) => {
                    warn!(branch = %branch, attempt, "lost branch head race, retrying commit");
                    if !self.abandon(txn, revision) {
                        revision = self.counter.next()?;
                    }
                }
                Err(e) => {
                    self.abandon(txn, revision);
                    return Err(e);
                }
            }
        }

        Err(CoreError::Busy {
            branch,
            attempts: self.max_commit_retries,
        })
    }

    fn write_versions(&self, txn: &Transaction, branch: &str, revision: Revision) -> CoreResult<()> {
        for (key, write) in txn.pending_writes() {
            let range = VersionRange::open(revision);
            let version = match write {
                PendingWrite::Put(document) => {
                    StoredVersion::live(range, revision.as_u64(), branch, document.clone())
                }
                PendingWrite::Remove => StoredVersion::tombstone(range, revision.as_u64(), branch),
            };
            if let Err(e) = self.store.put_version(&key.collection, &key.id, version) {
                self.drop_versions(txn, revision);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn drop_versions(&self, txn: &Transaction, revision: Revision) {
        for (key, _) in txn.pending_writes() {
            if let Err(e) = self.store.delete_version(&key.collection, &key.id, revision) {
                warn!(key = %key, revision = %revision, error = %e, "failed to drop orphan version");
            }
        }
    }

    /// Removes the versions and commit node of an attempt that lost the
    /// head race. Returns whether `revision` may be reused.
    fn abandon(&self, txn: &Transaction, revision: Revision) -> bool {
        self.drop_versions(txn, revision);
        match self.graph.discard(CommitId::for_revision(revision)) {
            Ok(()) => true,
            Err(e) => {
                warn!(revision = %revision, error = %e, "failed to discard orphan commit");
                false
            }
        }
    }

    /// The head has already moved, so failures here are only logged.
    fn close_superseded(&self, txn: &mut Transaction, branch: &str, revision: Revision) {
        let ancestors = match txn.ancestors(&self.graph) {
            Ok(ancestors) => ancestors,
            Err(e) => {
                warn!(branch, revision = %revision, error = %e, "failed to close superseded versions");
                return;
            }
        };
        self.close_versions(txn.pending_writes().map(|(key, _)| key), &ancestors, branch, revision);
    }

    /// Closes, at `revision`, the range of each key's version visible from
    /// `ancestors` when that version was written on `branch`.
    ///
    /// Failures are logged and skipped: an open range only delays garbage
    /// collection.
    pub(crate) fn close_versions<'k>(
        &self,
        keys: impl Iterator<Item = &'k DocumentKey>,
        ancestors: &HashSet<CommitId>,
        branch: &str,
        revision: Revision,
    ) {
        for key in keys {
            let versions = match self.store.versions(&key.collection, &key.id) {
                Ok(versions) => versions,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to read superseded version");
                    continue;
                }
            };
            let Some(previous) = visible_position(&versions, ancestors).map(|i| &versions[i]) else {
                continue;
            };
            if previous.branch != branch || !previous.range.is_open() {
                continue;
            }
            let closed = StoredVersion {
                range: previous.range.closed_at(revision),
                ..previous.clone()
            };
            if let Err(e) = self.store.put_version(&key.collection, &key.id, closed) {
                warn!(key = %key, error = %e, "failed to close superseded version");
            }
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("max_commit_retries", &self.max_commit_retries)
            .finish_non_exhaustive()
    }
}
