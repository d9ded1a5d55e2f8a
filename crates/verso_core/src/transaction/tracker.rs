//! Registry of open snapshots.

use crate::error::CoreResult;
use crate::types::{CommitId, Revision, TransactionId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The point in history an open transaction reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Owning transaction.
    pub transaction: TransactionId,
    /// Branch the transaction was started on.
    pub branch: String,
    /// Branch head when the transaction started.
    pub commit: CommitId,
    /// Revision of that commit.
    pub revision: Revision,
}

/// Everything the tracker keeps alive: open snapshots and commits whose
/// branch head swap has not finished yet.
#[derive(Debug, Default)]
pub(crate) struct OpenSet {
    snapshots: BTreeMap<TransactionId, Snapshot>,
    /// In-flight commit -> its parents.
    in_flight: BTreeMap<CommitId, Vec<CommitId>>,
}

impl OpenSet {
    /// Open snapshots, oldest transaction first.
    pub(crate) fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.values()
    }

    /// Commits being published, with their parents.
    pub(crate) fn in_flight(&self) -> impl Iterator<Item = (CommitId, &[CommitId])> {
        self.in_flight.iter().map(|(id, parents)| (*id, parents.as_slice()))
    }
}

/// Tracks which commits open transactions are reading from.
///
/// Registration and garbage collection both run under the tracker lock, so
/// a new transaction either is seen by a collection pass or reads a head
/// that pass retained. The lock is always taken before registry and graph
/// locks.
///
/// A commit is also pinned here from just before its node is created until
/// its branch head has moved, so dangling-commit pruning never sees it
/// unreachable.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    open: Mutex<OpenSet>,
}

impl SnapshotTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a snapshot for `transaction` and registers it in one step.
    ///
    /// `resolve` runs under the tracker lock and returns the commit to read
    /// from.
    pub(crate) fn register<F>(
        self: &Arc<Self>,
        transaction: TransactionId,
        branch: &str,
        resolve: F,
    ) -> CoreResult<(SnapshotGuard, Snapshot)>
    where
        F: FnOnce(&OpenSet) -> CoreResult<(CommitId, Revision)>,
    {
        let mut open = self.open.lock();
        let (commit, revision) = resolve(&*open)?;
        let snapshot = Snapshot {
            transaction,
            branch: branch.to_string(),
            commit,
            revision,
        };
        open.snapshots.insert(transaction, snapshot.clone());
        let guard = SnapshotGuard {
            tracker: Arc::clone(self),
            transaction,
        };
        Ok((guard, snapshot))
    }

    /// Pins `commit`, about to be created with `parents`, until the
    /// returned guard is dropped.
    pub(crate) fn pin_commit(self: &Arc<Self>, commit: CommitId, parents: &[CommitId]) -> CommitPin {
        self.open.lock().in_flight.insert(commit, parents.to_vec());
        CommitPin {
            tracker: Arc::clone(self),
            commit,
        }
    }

    /// Runs `f` with the tracker locked.
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&OpenSet) -> R) -> R {
        let open = self.open.lock();
        f(&*open)
    }

    /// Snapshots of every open transaction, oldest transaction first.
    #[must_use]
    pub fn open_snapshots(&self) -> Vec<Snapshot> {
        self.open.lock().snapshots.values().cloned().collect()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.open.lock().snapshots.len()
    }

    /// Number of open transactions started on `branch`.
    #[must_use]
    pub fn count_on(&self, branch: &str) -> usize {
        self.open
            .lock()
            .snapshots
            .values()
            .filter(|s| s.branch == branch)
            .count()
    }

    fn release(&self, transaction: TransactionId) {
        self.open.lock().snapshots.remove(&transaction);
    }

    fn unpin(&self, commit: CommitId) {
        self.open.lock().in_flight.remove(&commit);
    }
}

/// Keeps a snapshot registered until dropped.
#[derive(Debug)]
pub(crate) struct SnapshotGuard {
    tracker: Arc<SnapshotTracker>,
    transaction: TransactionId,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.tracker.release(self.transaction);
    }
}

/// Keeps an in-flight commit pinned until dropped.
#[derive(Debug)]
pub(crate) struct CommitPin {
    tracker: Arc<SnapshotTracker>,
    commit: CommitId,
}

impl Drop for CommitPin {
    fn drop(&mut self) {
        self.tracker.unpin(self.commit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn guard_deregisters_on_drop() {
        let tracker = Arc::new(SnapshotTracker::new());
        let (guard, snapshot) = tracker
            .register(TransactionId::new(1), "main", |_| Ok((CommitId::new(4), Revision::new(4))))
            .unwrap();
        assert_eq!(snapshot.commit, CommitId::new(4));
        assert_eq!(tracker.count_on("main"), 1);
        assert_eq!(tracker.count_on("dev"), 0);

        drop(guard);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn failed_resolve_registers_nothing() {
        let tracker = Arc::new(SnapshotTracker::new());
        let result = tracker.register(TransactionId::new(1), "gone", |_| {
            Err(CoreError::not_found("branch", "gone"))
        });
        assert!(result.is_err());
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn locked_view_lists_open_snapshots() {
        let tracker = Arc::new(SnapshotTracker::new());
        let _a = tracker
            .register(TransactionId::new(1), "main", |_| Ok((CommitId::new(1), Revision::new(1))))
            .unwrap();
        let _b = tracker
            .register(TransactionId::new(2), "dev", |_| Ok((CommitId::new(2), Revision::new(2))))
            .unwrap();
        let commits = tracker.with_locked(|open| open.snapshots().map(|s| s.commit).collect::<Vec<_>>());
        assert_eq!(commits, vec![CommitId::new(1), CommitId::new(2)]);
    }

    #[test]
    fn commit_pin_lasts_until_dropped() {
        let tracker = Arc::new(SnapshotTracker::new());
        let pin = tracker.pin_commit(CommitId::new(7), &[CommitId::new(3)]);
        let pinned = tracker.with_locked(|open| {
            open.in_flight()
                .map(|(id, parents)| (id, parents.to_vec()))
                .collect::<Vec<_>>()
        });
        assert_eq!(pinned, vec![(CommitId::new(7), vec![CommitId::new(3)])]);
        assert_eq!(tracker.count(), 0);

        drop(pin);
        assert_eq!(tracker.with_locked(|open| open.in_flight().count()), 0);
    }
}
