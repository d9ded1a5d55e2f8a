//! Garbage collection of unreachable versions.

use crate::catalog::{self, is_reserved, META, PRUNED_BELOW_KEY};
use crate::error::CoreResult;
use crate::graph::CommitGraph;
use crate::registry::BranchRegistry;
use crate::transaction::{visible_position, SnapshotTracker};
use crate::types::{CommitId, Revision};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use verso_storage::DocumentStore;

/// Outcome of a collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Lowest revision among the retained points.
    pub floor: Revision,
    /// Branch heads plus open snapshots, deduplicated.
    pub retained_points: usize,
    /// Versions examined.
    pub versions_scanned: usize,
    /// Versions reclaimed because their commit no longer exists.
    pub orphans_reclaimed: usize,
    /// Versions reclaimed because no retained point can see them.
    pub superseded_reclaimed: usize,
}

impl GcReport {
    /// Total versions reclaimed.
    #[must_use]
    pub fn reclaimed(&self) -> usize {
        self.orphans_reclaimed + self.superseded_reclaimed
    }
}

/// Reclaims versions no retained point can observe.
///
/// Retained points are every branch head and every open snapshot. A version
/// is reclaimed when
/// - its commit is gone from the graph and it starts below the floor, or
/// - its range closed at or below the floor and it is not the visible
///   version at any retained point.
///
/// History below the published `pruned_below` mark may be incomplete, so
/// branches cannot be created there.
pub struct GarbageCollector {
    store: Arc<dyn DocumentStore>,
    graph: Arc<CommitGraph>,
    branches: Arc<BranchRegistry>,
    tracker: Arc<SnapshotTracker>,
    pruned_below: Mutex<Revision>,
}

impl GarbageCollector {
    /// Creates a collector, loading the persisted `pruned_below` mark.
    pub fn load(
        store: Arc<dyn DocumentStore>,
        graph: Arc<CommitGraph>,
        branches: Arc<BranchRegistry>,
        tracker: Arc<SnapshotTracker>,
    ) -> CoreResult<Self> {
        let pruned_below: u64 = catalog::read(store.as_ref(), META, PRUNED_BELOW_KEY)?.unwrap_or(0);
        Ok(Self {
            store,
            graph,
            branches,
            tracker,
            pruned_below: Mutex::new(Revision::new(pruned_below)),
        })
    }

    /// Revisions below this mark may have lost versions to collection.
    #[must_use]
    pub fn pruned_below(&self) -> Revision {
        *self.pruned_below.lock()
    }

    /// Runs one collection pass.
    pub fn collect(&self) -> CoreResult<GcReport> {
        let (floor, points) = self
            .tracker
            .with_locked(|open| self.retain(open.snapshots().map(|s| s.commit)))?;

        let ancestor_sets = points
            .iter()
            .map(|point| self.graph.ancestors(*point))
            .collect::<CoreResult<Vec<HashSet<CommitId>>>>()?;

        let mut report = GcReport {
            floor,
            retained_points: points.len(),
            ..GcReport::default()
        };

        for collection in self.store.collections()? {
            if is_reserved(&collection) {
                continue;
            }
            for id in self.store.ids(&collection)? {
                let versions = self.store.versions(&collection, &id)?;
                let visible: HashSet<usize> = ancestor_sets
                    .iter()
                    .filter_map(|ancestors| visible_position(&versions, ancestors))
                    .collect();

                for (index, version) in versions.iter().enumerate() {
                    report.versions_scanned += 1;
                    let orphaned = !self.graph.contains(CommitId::new(version.commit))
                        && version.range.valid_from < floor;
                    let superseded = version.range.valid_to.is_some_and(|to| to <= floor)
                        && !visible.contains(&index);
                    if !orphaned && !superseded {
                        continue;
                    }
                    if self
                        .store
                        .delete_version(&collection, &id, version.range.valid_from)?
                    {
                        if orphaned {
                            report.orphans_reclaimed += 1;
                        } else {
                            report.superseded_reclaimed += 1;
                        }
                        debug!(collection = %collection, id = %id, valid_from = %version.range.valid_from, "reclaimed version");
                    }
                }
            }
        }

        self.store.sync()?;
        info!(
            floor = %report.floor,
            retained = report.retained_points,
            scanned = report.versions_scanned,
            reclaimed = report.reclaimed(),
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Collects the retained points and publishes the new floor. Runs under
    /// the tracker lock.
    fn retain(&self, snapshots: impl Iterator<Item = CommitId>) -> CoreResult<(Revision, BTreeSet<CommitId>)> {
        let mut points: BTreeSet<CommitId> = self.branches.heads().into_iter().collect();
        points.extend(snapshots);

        let mut floor: Option<Revision> = None;
        for point in &points {
            let revision = self.graph.get(*point)?.revision;
            floor = Some(floor.map_or(revision, |f| f.min(revision)));
        }
        let floor = floor.unwrap_or(Revision::ZERO);

        let mut pruned_below = self.pruned_below.lock();
        if floor > *pruned_below {
            catalog::write(self.store.as_ref(), META, PRUNED_BELOW_KEY, &floor.as_u64())?;
            *pruned_below = floor;
        }
        Ok((floor, points))
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("pruned_below", &self.pruned_below())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{CoreError, Database, Revision};
    use serde_json::json;

    fn write(db: &Database, branch: &str, id: &str, n: i64) {
        db.transaction(branch, |txn| txn.put("docs", id, json!(n))).unwrap();
    }

    fn read(db: &Database, txn: &mut crate::Transaction, id: &str) -> Option<serde_json::Value> {
        db.get(txn, "docs", id).unwrap()
    }

    #[test]
    fn empty_database_collects_nothing() {
        let db = Database::open_in_memory().unwrap();
        let report = db.collect_garbage().unwrap();
        assert_eq!(report.floor, Revision::ZERO);
        assert_eq!(report.retained_points, 1);
        assert_eq!(report.reclaimed(), 0);
    }

    #[test]
    fn default_report_starts_at_root() {
        let report = crate::GcReport::default();
        assert_eq!(report.floor, Revision::ZERO);
        assert_eq!(report.reclaimed(), 0);
    }

    #[test]
    fn superseded_versions_are_reclaimed() {
        let db = Database::open_in_memory().unwrap();
        for n in 1..=5 {
            write(&db, "main", "a", n);
        }

        let report = db.collect_garbage().unwrap();
        assert_eq!(report.floor, Revision::new(5));
        assert_eq!(report.versions_scanned, 5);
        assert_eq!(report.superseded_reclaimed, 4);
        assert_eq!(db.stats().unwrap().pruned_below, Revision::new(5));

        let mut txn = db.begin_transaction("main").unwrap();
        assert_eq!(read(&db, &mut txn, "a"), Some(json!(5)));
    }

    #[test]
    fn open_snapshot_pins_its_versions() {
        let db = Database::open_in_memory().unwrap();
        for n in 1..=5 {
            write(&db, "main", "a", n);
        }
        let mut pinned = db.begin_transaction("main").unwrap();
        assert_eq!(pinned.snapshot_revision(), Revision::new(5));

        for n in 6..=15 {
            write(&db, "main", "a", n);
        }

        let report = db.collect_garbage().unwrap();
        assert_eq!(report.floor, Revision::new(5));
        assert_eq!(report.retained_points, 2);
        assert_eq!(report.superseded_reclaimed, 4);
        assert_eq!(read(&db, &mut pinned, "a"), Some(json!(5)));

        db.rollback(&mut pinned);
        let report = db.collect_garbage().unwrap();
        assert_eq!(report.floor, Revision::new(15));
        assert_eq!(report.superseded_reclaimed, 10);

        let mut txn = db.begin_transaction("main").unwrap();
        assert_eq!(read(&db, &mut txn, "a"), Some(json!(15)));
    }

    #[test]
    fn branch_heads_keep_their_view() {
        let db = Database::open_in_memory().unwrap();
        write(&db, "main", "a", 1);
        let fork = db.current_head("main").unwrap();
        db.create_branch("dev", fork).unwrap();
        write(&db, "main", "a", 2);
        write(&db, "main", "a", 3);

        let report = db.collect_garbage().unwrap();
        assert_eq!(report.floor, Revision::new(1));

        let mut dev = db.begin_transaction("dev").unwrap();
        assert_eq!(read(&db, &mut dev, "a"), Some(json!(1)));
        let mut main = db.begin_transaction("main").unwrap();
        assert_eq!(read(&db, &mut main, "a"), Some(json!(3)));
    }

    #[test]
    fn floor_never_moves_backwards() {
        let db = Database::open_in_memory().unwrap();
        write(&db, "main", "a", 1);
        write(&db, "main", "a", 2);
        db.collect_garbage().unwrap();
        assert_eq!(db.stats().unwrap().pruned_below, Revision::new(2));

        // A branch created at the current head keeps the floor where it is.
        let head = db.current_head("main").unwrap();
        db.create_branch("dev", head).unwrap();
        write(&db, "main", "a", 3);
        db.collect_garbage().unwrap();
        assert_eq!(db.stats().unwrap().pruned_below, Revision::new(2));
    }

    #[test]
    fn collected_history_cannot_be_branched() {
        let db = Database::open_in_memory().unwrap();
        write(&db, "main", "a", 1);
        let old = db.current_head("main").unwrap();
        write(&db, "main", "a", 2);
        db.collect_garbage().unwrap();

        let err = db.create_branch("old", old).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }
}
