//! Database facade.

use crate::catalog::{self, FORMAT_VERSION_KEY, META};
use crate::config::Config;
use crate::counter::RevisionCounter;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::gc::{GarbageCollector, GcReport};
use crate::graph::{now_ms, Commit, CommitGraph};
use crate::registry::BranchRegistry;
use crate::transaction::{OpenSet, SnapshotTracker, Transaction, TransactionManager};
use crate::types::{CommitId, Revision};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use verso_storage::{
    CompactionStats, Document, DocumentId, DocumentStore, FileBackend, LogStore, MemoryStore,
};

/// Result of [`Database::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "commit", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The source was already part of the target's history.
    UpToDate(CommitId),
    /// The target head moved forward to the source head.
    FastForward(CommitId),
    /// A two-parent merge commit was created.
    Merged(CommitId),
}

impl MergeOutcome {
    /// The target branch head after the merge.
    #[must_use]
    pub fn commit(&self) -> CommitId {
        match *self {
            Self::UpToDate(id) | Self::FastForward(id) | Self::Merged(id) => id,
        }
    }
}

/// Counters describing an open database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Highest revision handed out.
    pub revision: Revision,
    /// Commits in the graph.
    pub commits: usize,
    /// Branches.
    pub branches: usize,
    /// Open transactions.
    pub open_transactions: usize,
    /// User collections holding at least one version.
    pub collections: usize,
    /// Garbage collection floor.
    pub pruned_below: Revision,
    /// Size of the store log, for on-disk databases.
    pub log_bytes: Option<u64>,
}

/// The main database handle.
///
/// `Database` is the entry point for Verso. It ties together:
/// - the document store (in memory, or a log file in a locked directory)
/// - the commit graph and branch registry
/// - the transaction manager and garbage collector
///
/// A `Database` is `Send + Sync`; share it between threads with an `Arc`.
///
/// # Example
///
/// ```rust
/// use verso_core::Database;
/// use serde_json::json;
///
/// let db = Database::open_in_memory().unwrap();
/// db.transaction("main", |txn| {
///     txn.put("users", "ada", json!({ "name": "Ada" }))
/// })
/// .unwrap();
///
/// let mut txn = db.begin_transaction("main").unwrap();
/// assert_eq!(db.get(&mut txn, "users", "ada").unwrap(), Some(json!({ "name": "Ada" })));
/// ```
pub struct Database {
    config: Config,
    /// Holds the directory lock. None for in-memory databases.
    dir: Option<DatabaseDir>,
    store: Arc<dyn DocumentStore>,
    /// The store again, when it is a log that can be compacted.
    log: Option<Arc<LogStore>>,
    graph: Arc<CommitGraph>,
    branches: Arc<BranchRegistry>,
    counter: Arc<RevisionCounter>,
    tracker: Arc<SnapshotTracker>,
    txn_manager: TransactionManager,
    gc: GarbageCollector,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database directory with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another process has it open, and
    /// `CorruptState` if the persisted engine state is inconsistent.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database directory with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use verso_core::{Config, Database};
    /// use std::path::Path;
    ///
    /// let config = Config::default().default_branch("trunk").sync_on_commit(false);
    /// let db = Database::open_with_config(Path::new("my_database"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;

        if !config.create_if_missing && dir.is_new_database() {
            return Err(CoreError::not_found("database", path.display()));
        }
        if config.error_if_exists && !dir.is_new_database() {
            return Err(CoreError::already_exists("database", path.display()));
        }

        let backend = FileBackend::open_with_create_dirs(&dir.store_path())?;
        let log = Arc::new(LogStore::open(Box::new(backend))?);
        let store: Arc<dyn DocumentStore> = log.clone();
        Self::assemble(config, Some(dir), store, Some(log))
    }

    /// Opens a database over an existing document store.
    pub fn open_with_store(config: Config, store: Arc<dyn DocumentStore>) -> CoreResult<Self> {
        Self::assemble(config, None, store, None)
    }

    /// Opens a fresh in-memory database. Data is lost when it is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_store(Config::default(), Arc::new(MemoryStore::new()))
    }

    fn assemble(
        config: Config,
        dir: Option<DatabaseDir>,
        store: Arc<dyn DocumentStore>,
        log: Option<Arc<LogStore>>,
    ) -> CoreResult<Self> {
        match catalog::read::<u16>(store.as_ref(), META, FORMAT_VERSION_KEY)? {
            Some(version) if version != config.format_version => {
                return Err(CoreError::invalid_operation(format!(
                    "incompatible format version: database is v{version}, expected v{}",
                    config.format_version
                )));
            }
            Some(_) => {}
            None => catalog::write(store.as_ref(), META, FORMAT_VERSION_KEY, &config.format_version)?,
        }

        let graph = Arc::new(CommitGraph::load(Arc::clone(&store), &config.default_branch)?);
        let counter = Arc::new(RevisionCounter::load(
            Arc::clone(&store),
            config.revision_block_size,
        )?);
        counter.observe(graph.max_revision());

        let branches = Arc::new(BranchRegistry::load(
            Arc::clone(&store),
            &config.default_branch,
            graph.root(),
        )?);
        for (name, head) in branches.list() {
            if !graph.contains(head) {
                return Err(CoreError::corrupt_state(format!(
                    "branch {name} points at unknown commit {head}"
                )));
            }
        }

        let tracker = Arc::new(SnapshotTracker::new());
        let gc = GarbageCollector::load(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&branches),
            Arc::clone(&tracker),
        )?;
        let txn_manager = TransactionManager::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&branches),
            Arc::clone(&counter),
            Arc::clone(&tracker),
            &config,
        );
        store.sync()?;

        info!(
            commits = graph.len(),
            branches = branches.list().len(),
            revision = %counter.current(),
            "opened database"
        );

        Ok(Self {
            config,
            dir,
            store,
            log,
            graph,
            branches,
            counter,
            tracker,
            txn_manager,
            gc,
            is_open: RwLock::new(true),
        })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction on the current head of `branch`.
    pub fn begin_transaction(&self, branch: &str) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txn_manager.begin(branch)
    }

    /// Begins a read-only transaction on any retained commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when garbage collection may already have
    /// reclaimed versions `commit` needs.
    pub fn begin_at(&self, commit: CommitId) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txn_manager
            .begin_pinned(commit, |open| self.check_collectable_history(commit, open))
    }

    /// Reads a document as `txn` sees it.
    pub fn get(
        &self,
        txn: &mut Transaction,
        collection: &str,
        id: impl Into<DocumentId>,
    ) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        self.txn_manager.get(txn, collection, &id.into())
    }

    /// Buffers a put in `txn`.
    pub fn put(
        &self,
        txn: &mut Transaction,
        collection: &str,
        id: impl Into<DocumentId>,
        document: Document,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        txn.put(collection, id, document)
    }

    /// Buffers a put of a new document under a generated id.
    pub fn insert(&self, txn: &mut Transaction, collection: &str, document: Document) -> CoreResult<DocumentId> {
        let id = DocumentId::generate();
        self.put(txn, collection, id.clone(), document)?;
        Ok(id)
    }

    /// Buffers a removal in `txn`.
    pub fn remove(&self, txn: &mut Transaction, collection: &str, id: impl Into<DocumentId>) -> CoreResult<()> {
        self.ensure_open()?;
        txn.remove(collection, id)
    }

    /// Visible documents of `collection` accepted by `filter`, in id order.
    pub fn scan<F>(&self, txn: &mut Transaction, collection: &str, filter: F) -> CoreResult<Vec<(DocumentId, Document)>>
    where
        F: Fn(&DocumentId, &Document) -> bool,
    {
        self.ensure_open()?;
        self.txn_manager.scan(txn, collection, &filter)
    }

    /// Visible documents having every top-level field of `example`.
    pub fn find(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.ensure_open()?;
        self.txn_manager.find(txn, collection, example)
    }

    /// The first visible document, in id order, matching `example`.
    pub fn find_one(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
    ) -> CoreResult<Option<(DocumentId, Document)>> {
        self.ensure_open()?;
        self.txn_manager.find_one(txn, collection, example)
    }

    /// Like [`Database::find`], keeping only `fields` of object documents.
    pub fn find_fields(
        &self,
        txn: &mut Transaction,
        collection: &str,
        example: &Document,
        fields: &[&str],
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        self.ensure_open()?;
        self.txn_manager.find_fields(txn, collection, example, fields)
    }

    /// Buffers the removal of every visible document matching `example`
    /// and returns how many there were.
    pub fn remove_matching(&self, txn: &mut Transaction, collection: &str, example: &Document) -> CoreResult<usize> {
        self.ensure_open()?;
        self.txn_manager.remove_matching(txn, collection, example)
    }

    /// Commits `txn`. See [`TransactionManager::commit`].
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitId> {
        self.ensure_open()?;
        self.txn_manager.commit(txn)
    }

    /// Discards `txn`'s writes. Always succeeds and may be repeated.
    pub fn rollback(&self, txn: &mut Transaction) {
        self.txn_manager.rollback(txn);
    }

    /// Runs `f` in a transaction on `branch`.
    ///
    /// If `f` returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub fn transaction<F, T>(&self, branch: &str, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin_transaction(branch)?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(&mut txn);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// Creates branch `name` at commit `from`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when garbage collection may already have
    /// reclaimed versions `from` needs.
    pub fn create_branch(&self, name: &str, from: CommitId) -> CoreResult<()> {
        self.ensure_open()?;
        self.tracker.with_locked(|open| {
            self.check_collectable_history(from, open)?;
            self.branches.create(name, from)?;
            self.sync_if_configured()
        })
    }

    /// Deletes branch `name`. Its commits become dangling unless another
    /// branch reaches them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for the last branch or while transactions
    /// are open on it.
    pub fn delete_branch(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.tracker.with_locked(|open| {
            let readers = open.snapshots().filter(|s| s.branch == name).count();
            if readers > 0 {
                return Err(CoreError::invalid_operation(format!(
                    "branch {name} has {readers} open transaction(s)"
                )));
            }
            self.branches.delete(name)?;
            self.sync_if_configured()
        })
    }

    /// All branches with their heads, sorted by name.
    pub fn list_branches(&self) -> CoreResult<Vec<(String, CommitId)>> {
        self.ensure_open()?;
        Ok(self.branches.list())
    }

    /// The head commit of `branch`.
    pub fn current_head(&self, branch: &str) -> CoreResult<CommitId> {
        self.ensure_open()?;
        self.branches.head(branch)
    }

    /// Merges `source` into `target`.
    ///
    /// Fast-forwards when `target` is an ancestor of `source`. Otherwise
    /// creates a merge commit on `target`, provided the documents changed
    /// on each side since their common ancestor are disjoint.
    ///
    /// # Errors
    ///
    /// Returns `WriteConflict` naming the first document changed on both
    /// sides, and `StaleHead` if `target` moved during the merge.
    pub fn merge(&self, target: &str, source: &str) -> CoreResult<MergeOutcome> {
        self.ensure_open()?;
        if target == source {
            return Err(CoreError::invalid_operation("cannot merge a branch into itself"));
        }
        let target_head = self.branches.head(target)?;
        let source_head = self.branches.head(source)?;

        if self.graph.is_ancestor(source_head, target_head)? {
            return Ok(MergeOutcome::UpToDate(target_head));
        }
        if self.graph.is_ancestor(target_head, source_head)? {
            self.branches.advance(target, target_head, source_head)?;
            self.sync_if_configured()?;
            info!(branch = target, source, head = %source_head, "fast-forwarded branch");
            return Ok(MergeOutcome::FastForward(source_head));
        }

        let base = self.graph.common_ancestor(target_head, source_head)?;
        let ours = self.graph.touched_between(base, target_head)?;
        let theirs = self.graph.touched_between(base, source_head)?;
        if let Some(key) = theirs.intersection(&ours).next() {
            return Err(CoreError::WriteConflict {
                collection: key.collection.clone(),
                id: key.id.clone(),
            });
        }

        let revision = self.counter.next()?;
        let parents = [target_head, source_head];
        let _pin = self.tracker.pin_commit(CommitId::for_revision(revision), &parents);
        let merge = self.graph.create_commit(&parents, target, revision, theirs.clone())?;
        let published = self
            .sync_if_configured()
            .and_then(|()| self.branches.advance(target, target_head, merge.id));
        if let Err(e) = published {
            if let Err(discard) = self.graph.discard(merge.id) {
                warn!(commit = %merge.id, error = %discard, "failed to discard merge commit");
            }
            return Err(e);
        }

        match self.graph.ancestors(target_head) {
            Ok(ancestors) => self.txn_manager.close_versions(theirs.iter(), &ancestors, target, revision),
            Err(e) => warn!(branch = target, error = %e, "failed to close superseded versions"),
        }
        self.sync_if_configured()?;
        info!(branch = target, source, base = %base, commit = %merge.id, "merged branches");
        Ok(MergeOutcome::Merged(merge.id))
    }

    /// Moves `branch` forward to `to`, which must descend from its head.
    pub fn fast_forward(&self, branch: &str, to: CommitId) -> CoreResult<()> {
        self.ensure_open()?;
        let head = self.branches.head(branch)?;
        if head == to {
            return Ok(());
        }
        if !self.graph.is_ancestor(head, to)? {
            return Err(CoreError::invalid_operation(format!(
                "{to} does not descend from {branch} head {head}"
            )));
        }
        self.branches.advance(branch, head, to)?;
        self.sync_if_configured()?;
        info!(branch, head = %to, "fast-forwarded branch");
        Ok(())
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Returns a commit.
    pub fn commit_info(&self, id: CommitId) -> CoreResult<Arc<Commit>> {
        self.ensure_open()?;
        self.graph.get(id)
    }

    /// The parents of a commit.
    pub fn parents(&self, id: CommitId) -> CoreResult<Vec<Arc<Commit>>> {
        self.ensure_open()?;
        self.graph.parents(id)
    }

    /// The children of a commit, oldest first.
    pub fn children(&self, id: CommitId) -> CoreResult<Vec<Arc<Commit>>> {
        self.ensure_open()?;
        self.graph.children(id)
    }

    /// Up to `limit` commits along `branch`'s first-parent line, newest
    /// first.
    pub fn log(&self, branch: &str, limit: usize) -> CoreResult<Vec<Arc<Commit>>> {
        self.ensure_open()?;
        self.graph.first_parent_history(self.branches.head(branch)?, limit)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Reclaims versions no branch head or open transaction can see.
    pub fn collect_garbage(&self) -> CoreResult<GcReport> {
        self.ensure_open()?;
        self.gc.collect()
    }

    /// Commits unreachable from every branch and open transaction that are
    /// older than `expiry`, ordered by id.
    pub fn find_dangling_commits(&self, expiry: Duration) -> CoreResult<Vec<CommitId>> {
        self.ensure_open()?;
        self.tracker.with_locked(|open| self.dangling(open, expiry))
    }

    /// Removes the commits [`Database::find_dangling_commits`] reports.
    /// Their versions become reclaimable by garbage collection.
    pub fn prune_dangling_commits(&self, expiry: Duration) -> CoreResult<usize> {
        self.ensure_open()?;
        self.tracker.with_locked(|open| {
            let dangling = self.dangling(open, expiry)?;
            if dangling.is_empty() {
                return Ok(0);
            }
            let removed = self.graph.remove_dangling(&dangling)?;
            self.store.sync()?;
            info!(removed, "pruned dangling commits");
            Ok(removed)
        })
    }

    /// Rewrites the store log without superseded records. Returns `None`
    /// for databases not backed by a log.
    pub fn compact(&self) -> CoreResult<Option<CompactionStats>> {
        self.ensure_open()?;
        match &self.log {
            Some(log) => Ok(Some(log.compact()?)),
            None => Ok(None),
        }
    }

    /// Returns database counters.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.ensure_open()?;
        let collections = self
            .store
            .collections()?
            .iter()
            .filter(|c| !catalog::is_reserved(c))
            .count();
        let log_bytes = match &self.log {
            Some(log) => Some(log.log_size()?),
            None => None,
        };
        Ok(DatabaseStats {
            revision: self.counter.current(),
            commits: self.graph.len(),
            branches: self.branches.list().len(),
            open_transactions: self.tracker.count(),
            collections,
            pruned_below: self.gc.pruned_below(),
            log_bytes,
        })
    }

    /// Closes the database, persisting the revision counter and syncing the
    /// store.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        self.counter.flush()?;
        self.store.sync()?;

        *is_open = false;
        info!("closed database");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory of an on-disk database.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Syncs the store when `sync_on_commit` is set.
    fn sync_if_configured(&self) -> CoreResult<()> {
        if self.config.sync_on_commit {
            self.store.sync()?;
        }
        Ok(())
    }

    /// Fails when garbage collection may have reclaimed versions `commit`
    /// needs. Runs under the tracker lock.
    fn check_collectable_history(&self, commit: CommitId, open: &OpenSet) -> CoreResult<()> {
        let revision = self.graph.get(commit)?.revision;
        let pruned_below = self.gc.pruned_below();
        if revision < pruned_below {
            return Err(CoreError::invalid_operation(format!(
                "commit {commit} is below the collected floor {pruned_below}"
            )));
        }
        if pruned_below > Revision::ZERO && !self.is_retained(commit, open)? {
            return Err(CoreError::invalid_operation(format!(
                "commit {commit} is not reachable from any branch or open transaction"
            )));
        }
        Ok(())
    }

    /// Whether `commit` is reachable from a branch head or open snapshot.
    fn is_retained(&self, commit: CommitId, open: &OpenSet) -> CoreResult<bool> {
        let points = self.branches.heads().into_iter().chain(open.snapshots().map(|s| s.commit));
        for point in points {
            if self.graph.is_ancestor(commit, point)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dangling(&self, open: &OpenSet, expiry: Duration) -> CoreResult<Vec<CommitId>> {
        let mut reachable = HashSet::new();
        let mut points: Vec<CommitId> = self.branches.heads();
        points.extend(open.snapshots().map(|s| s.commit));
        // A commit being published keeps itself and its parents.
        for (commit, parents) in open.in_flight() {
            reachable.insert(commit);
            points.extend(parents.iter().copied().filter(|p| self.graph.contains(*p)));
        }
        for point in points {
            reachable.extend(self.graph.ancestors(point)?);
        }

        let commits = self.graph.commits();
        let mut children: HashMap<CommitId, Vec<CommitId>> = HashMap::new();
        for commit in &commits {
            for parent in &commit.parents {
                children.entry(*parent).or_default().push(commit.id);
            }
        }

        let expiry_ms = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms().saturating_sub(expiry_ms);
        let mut candidates: BTreeSet<CommitId> = commits
            .iter()
            .filter(|c| !reachable.contains(&c.id) && c.timestamp_ms <= cutoff)
            .map(|c| c.id)
            .collect();

        // A young dangling child keeps its parents.
        loop {
            let blocked: Vec<CommitId> = candidates
                .iter()
                .copied()
                .filter(|id| {
                    children
                        .get(id)
                        .is_some_and(|kids| kids.iter().any(|kid| !candidates.contains(kid)))
                })
                .collect();
            if blocked.is_empty() {
                break;
            }
            for id in blocked {
                candidates.remove(&id);
            }
        }
        Ok(candidates.into_iter().collect())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("path", &self.path())
            .field("commits", &self.graph.len())
            .field("revision", &self.counter.current())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close database cleanly");
        }
    }
}


/// Persistence tests that require a real file system.
#[cfg(test)]
mod persistence_tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn data_and_branches_persist_across_restarts() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("persist_test");

        let head = {
            let db = Database::open(&db_path).unwrap();
            db.transaction("main", |txn| txn.put("users", "ada", json!({ "name": "Ada" })))
                .unwrap();
            let head = db.current_head("main").unwrap();
            db.create_branch("dev", head).unwrap();
            db.close().unwrap();
            head
        };

        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.current_head("dev").unwrap(), head);
        let mut txn = db.begin_transaction("dev").unwrap();
        assert_eq!(
            db.get(&mut txn, "users", "ada").unwrap(),
            Some(json!({ "name": "Ada" }))
        );
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked");
        let _db = Database::open(&db_path).unwrap();
        assert!(matches!(Database::open(&db_path), Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn error_if_exists_and_create_if_missing() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("flags");

        let missing = Database::open_with_config(&db_path, Config::default().create_if_missing(false));
        assert!(missing.is_err());

        drop(Database::open(&db_path).unwrap());
        let exists = Database::open_with_config(&db_path, Config::default().error_if_exists(true));
        assert!(matches!(exists, Err(CoreError::AlreadyExists { .. })));
    }

    #[test]
    fn compaction_shrinks_log_and_keeps_data() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("compact");
        {
            let db = Database::open(&db_path).unwrap();
            for n in 0..20 {
                db.transaction("main", |txn| txn.put("docs", "counter", json!(n))).unwrap();
            }
            db.collect_garbage().unwrap();
            let stats = db.compact().unwrap().unwrap();
            assert!(stats.bytes_after < stats.bytes_before);
        }

        let db = Database::open(&db_path).unwrap();
        let mut txn = db.begin_transaction("main").unwrap();
        assert_eq!(db.get(&mut txn, "docs", "counter").unwrap(), Some(json!(19)));
    }
}
