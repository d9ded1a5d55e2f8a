//! Transaction state.

use crate::catalog::check_user_collection;
use crate::error::{CoreError, CoreResult};
use crate::graph::CommitGraph;
use crate::transaction::tracker::{Snapshot, SnapshotGuard};
use crate::types::{CommitId, DocumentKey, Revision, TransactionId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use verso_storage::{Document, DocumentId};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Represents a pending write in a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Insert or replace a document.
    Put(Document),
    /// Remove a document.
    Remove,
}

/// A transaction reading from a fixed snapshot of one branch.
///
/// Writes are buffered here and invisible to everyone else until commit.
/// Dropping an active transaction discards its writes and releases its
/// snapshot.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    branch: String,
    snapshot: CommitId,
    snapshot_revision: Revision,
    state: TransactionState,
    read_only: bool,
    /// Pending writes, in key order.
    writes: BTreeMap<DocumentKey, PendingWrite>,
    /// Read set: key -> `valid_from` of the version seen, `None` if absent.
    reads: HashMap<DocumentKey, Option<Revision>>,
    /// Commits visible from the snapshot, computed on first read.
    ancestors: Option<Arc<HashSet<CommitId>>>,
    guard: Option<SnapshotGuard>,
}

impl Transaction {
    pub(crate) fn new(snapshot: Snapshot, guard: Option<SnapshotGuard>) -> Self {
        Self {
            id: snapshot.transaction,
            branch: snapshot.branch,
            snapshot: snapshot.commit,
            snapshot_revision: snapshot.revision,
            state: TransactionState::Active,
            read_only: false,
            writes: BTreeMap::new(),
            reads: HashMap::new(),
            ancestors: None,
            guard,
        }
    }

    pub(crate) fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Branch the transaction commits to.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Commit the transaction reads from.
    #[must_use]
    pub fn snapshot(&self) -> CommitId {
        self.snapshot
    }

    /// Revision of the snapshot commit.
    #[must_use]
    pub fn snapshot_revision(&self) -> Revision {
        self.snapshot_revision
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether writes are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Buffers a put.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or read-only, the collection is
    /// reserved, or the document is JSON `null` (use [`Transaction::remove`]).
    pub fn put(&mut self, collection: &str, id: impl Into<DocumentId>, document: Document) -> CoreResult<()> {
        self.ensure_writable()?;
        check_user_collection(collection)?;
        if document.is_null() {
            return Err(CoreError::invalid_operation("cannot store null; remove the document instead"));
        }
        self.writes
            .insert(DocumentKey::new(collection, id), PendingWrite::Put(document));
        Ok(())
    }

    /// Buffers a removal.
    pub fn remove(&mut self, collection: &str, id: impl Into<DocumentId>) -> CoreResult<()> {
        self.ensure_writable()?;
        check_user_collection(collection)?;
        self.writes
            .insert(DocumentKey::new(collection, id), PendingWrite::Remove);
        Ok(())
    }

    /// Records a read for conflict bookkeeping. Only writers keep a read
    /// set.
    pub(crate) fn record_read(&mut self, key: DocumentKey, seen: Option<Revision>) {
        if !self.writes.is_empty() && !self.writes.contains_key(&key) {
            self.reads.insert(key, seen);
        }
    }

    /// Gets a pending write for a document.
    #[must_use]
    pub fn pending_write(&self, key: &DocumentKey) -> Option<&PendingWrite> {
        self.writes.get(key)
    }

    /// Returns all pending writes, in key order.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&DocumentKey, &PendingWrite)> {
        self.writes.iter()
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns the read set.
    pub fn read_set(&self) -> impl Iterator<Item = (&DocumentKey, &Option<Revision>)> {
        self.reads.iter()
    }

    /// Commits visible from the snapshot.
    pub(crate) fn ancestors(&mut self, graph: &CommitGraph) -> CoreResult<Arc<HashSet<CommitId>>> {
        if let Some(ancestors) = &self.ancestors {
            return Ok(Arc::clone(ancestors));
        }
        let ancestors = Arc::new(graph.ancestors(self.snapshot)?);
        self.ancestors = Some(Arc::clone(&ancestors));
        Ok(ancestors)
    }

    /// Marks the transaction as committed and releases its snapshot.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
        self.guard = None;
    }

    /// Marks the transaction as aborted and releases its snapshot.
    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
        self.writes.clear();
        self.guard = None;
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        Ok(())
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_txn() -> Transaction {
        Transaction::new(
            Snapshot {
                transaction: TransactionId::new(1),
                branch: "main".into(),
                commit: CommitId::ROOT,
                revision: Revision::ZERO,
            },
            None,
        )
    }

    #[test]
    fn new_transaction_is_active() {
        let txn = create_txn();
        assert!(txn.is_active());
        assert_eq!(txn.state(), TransactionState::Active);
        assert_eq!(txn.branch(), "main");
    }

    #[test]
    fn put_overwrites_previous() {
        let mut txn = create_txn();
        txn.put("docs", "a", json!(1)).unwrap();
        txn.put("docs", "a", json!(2)).unwrap();

        assert_eq!(txn.write_count(), 1);
        assert_eq!(
            txn.pending_write(&DocumentKey::new("docs", "a")),
            Some(&PendingWrite::Put(json!(2)))
        );
    }

    #[test]
    fn remove_records_write() {
        let mut txn = create_txn();
        txn.put("docs", "a", json!({})).unwrap();
        txn.remove("docs", "a").unwrap();
        assert_eq!(
            txn.pending_write(&DocumentKey::new("docs", "a")),
            Some(&PendingWrite::Remove)
        );
    }

    #[test]
    fn reserved_collections_and_null_are_rejected() {
        let mut txn = create_txn();
        assert!(txn.put("_meta", "a", json!(1)).is_err());
        assert!(txn.remove("_branches", "main").is_err());
        assert!(txn.put("docs", "a", json!(null)).is_err());
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn cannot_write_after_commit() {
        let mut txn = create_txn();
        txn.mark_committed();
        assert!(txn.put("docs", "a", json!(1)).is_err());
    }

    #[test]
    fn abort_discards_writes() {
        let mut txn = create_txn();
        txn.put("docs", "a", json!(1)).unwrap();
        txn.mark_aborted();
        assert_eq!(txn.write_count(), 0);
        assert!(txn.remove("docs", "a").is_err());
    }

    #[test]
    fn read_not_recorded_if_written() {
        let mut txn = create_txn();
        txn.put("docs", "a", json!(1)).unwrap();
        txn.record_read(DocumentKey::new("docs", "a"), Some(Revision::new(5)));
        txn.record_read(DocumentKey::new("docs", "b"), None);

        let reads: Vec<_> = txn.read_set().collect();
        assert_eq!(reads, vec![(&DocumentKey::new("docs", "b"), &None)]);
    }

    #[test]
    fn pure_reader_keeps_no_read_set() {
        let mut txn = create_txn();
        txn.record_read(DocumentKey::new("docs", "a"), Some(Revision::new(5)));
        assert_eq!(txn.read_set().count(), 0);
    }

    #[test]
    fn read_only_rejects_writes() {
        let mut txn = create_txn().into_read_only();
        assert!(txn.is_read_only());
        assert!(matches!(
            txn.put("docs", "a", json!(1)),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(txn.remove("docs", "a").is_err());
        assert_eq!(txn.write_count(), 0);
        assert!(txn.is_active());
    }
}
