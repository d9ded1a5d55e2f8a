//! The commit graph.
//!
//! An append-only DAG of immutable commits keyed by [`CommitId`]. Each node
//! is persisted in `_commits` before it is published in memory, so a reader
//! that can see a commit can always reload it.

use crate::catalog::{self, COMMITS};
use crate::error::{CoreError, CoreResult};
use crate::types::{CommitId, DocumentKey, Revision};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use verso_storage::DocumentStore;

/// An immutable node of the commit graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit id. Equal in value to `revision`.
    pub id: CommitId,
    /// Revision at which the commit's versions became valid.
    pub revision: Revision,
    /// Empty for the root, one parent normally, two for a merge.
    pub parents: Vec<CommitId>,
    /// Branch the commit was made on.
    pub branch: String,
    /// Wall-clock creation time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Documents written by the commit.
    pub changes: BTreeSet<DocumentKey>,
}

impl Commit {
    /// Whether this is the root commit.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether this commit joins two lines of history.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<CommitId, Arc<Commit>>,
    children: HashMap<CommitId, Vec<CommitId>>,
}

impl GraphInner {
    fn get(&self, id: CommitId) -> CoreResult<&Arc<Commit>> {
        self.nodes.get(&id).ok_or_else(|| CoreError::not_found("commit", id))
    }

    fn insert(&mut self, commit: Arc<Commit>) {
        for parent in &commit.parents {
            self.children.entry(*parent).or_default().push(commit.id);
        }
        self.nodes.insert(commit.id, commit);
    }

    fn unlink(&mut self, id: CommitId) {
        if let Some(commit) = self.nodes.remove(&id) {
            for parent in &commit.parents {
                if let Some(siblings) = self.children.get_mut(parent) {
                    siblings.retain(|c| *c != id);
                }
            }
        }
        self.children.remove(&id);
    }

    /// Breadth-first walk over `start` and its ancestors. Commits with a
    /// revision below `floor` are not expanded.
    fn walk(&self, start: CommitId, floor: Revision) -> CoreResult<HashSet<CommitId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let commit = self.get(id)?;
            if commit.revision < floor {
                continue;
            }
            queue.extend(commit.parents.iter().copied());
        }
        Ok(seen)
    }
}

/// The commit DAG shared by every branch.
pub struct CommitGraph {
    store: Arc<dyn DocumentStore>,
    inner: RwLock<GraphInner>,
}

impl CommitGraph {
    /// Rebuilds the graph from `_commits`, creating the root commit on
    /// `default_branch` when the store holds none.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` if a parent is missing, a revision is not above
    /// its parents', or there is not exactly one root.
    pub fn load(store: Arc<dyn DocumentStore>, default_branch: &str) -> CoreResult<Self> {
        let records = catalog::read_all::<Commit>(store.as_ref(), COMMITS)?;
        let graph = Self {
            store,
            inner: RwLock::new(GraphInner::default()),
        };

        if records.is_empty() {
            let root = Commit {
                id: CommitId::ROOT,
                revision: Revision::ZERO,
                parents: Vec::new(),
                branch: default_branch.to_string(),
                timestamp_ms: now_ms(),
                changes: BTreeSet::new(),
            };
            graph.persist(&root)?;
            graph.inner.write().insert(Arc::new(root));
            info!(branch = default_branch, "created root commit");
            return Ok(graph);
        }

        let mut nodes = HashMap::with_capacity(records.len());
        for (key, commit) in records {
            if key.as_str() != commit.id.as_u64().to_string() {
                return Err(CoreError::corrupt_state(format!(
                    "commit record {key} holds commit {}",
                    commit.id
                )));
            }
            if commit.id.as_u64() != commit.revision.as_u64() {
                return Err(CoreError::corrupt_state(format!(
                    "commit {} has revision {}",
                    commit.id, commit.revision
                )));
            }
            nodes.insert(commit.id, Arc::new(commit));
        }

        let roots: Vec<CommitId> = nodes.values().filter(|c| c.is_root()).map(|c| c.id).collect();
        if roots != [CommitId::ROOT] {
            return Err(CoreError::corrupt_state(format!(
                "expected a single root commit c0, found {roots:?}"
            )));
        }

        let mut inner = GraphInner::default();
        for commit in nodes.values() {
            for parent_id in &commit.parents {
                let parent = nodes.get(parent_id).ok_or_else(|| {
                    CoreError::corrupt_state(format!("commit {} has unknown parent {parent_id}", commit.id))
                })?;
                if parent.revision >= commit.revision {
                    return Err(CoreError::corrupt_state(format!(
                        "commit {} is not newer than its parent {parent_id}",
                        commit.id
                    )));
                }
            }
            inner.insert(Arc::clone(commit));
        }

        debug!(commits = inner.nodes.len(), "loaded commit graph");
        *graph.inner.write() = inner;
        Ok(graph)
    }

    /// Adds a commit made at `revision` on top of `parents`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown parent and `InvalidOperation` when
    /// the revision is not above every parent's, the id is taken, or the
    /// parent count is not one or two.
    pub fn create_commit(
        &self,
        parents: &[CommitId],
        branch: &str,
        revision: Revision,
        changes: BTreeSet<DocumentKey>,
    ) -> CoreResult<Arc<Commit>> {
        if parents.is_empty() || parents.len() > 2 {
            return Err(CoreError::invalid_operation(format!(
                "a commit needs one or two parents, got {}",
                parents.len()
            )));
        }

        let id = CommitId::for_revision(revision);
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&id) {
            return Err(CoreError::invalid_operation(format!("commit {id} already exists")));
        }
        for parent in parents {
            let parent = inner.get(*parent)?;
            if parent.revision >= revision {
                return Err(CoreError::invalid_operation(format!(
                    "revision {revision} is not newer than parent {}",
                    parent.id
                )));
            }
        }

        let commit = Commit {
            id,
            revision,
            parents: parents.to_vec(),
            branch: branch.to_string(),
            timestamp_ms: now_ms(),
            changes,
        };
        self.persist(&commit)?;
        let commit = Arc::new(commit);
        inner.insert(Arc::clone(&commit));
        Ok(commit)
    }

    /// Removes a commit nothing builds on. Used to drop the node of a
    /// commit that lost the head race.
    pub(crate) fn discard(&self, id: CommitId) -> CoreResult<()> {
        if id == CommitId::ROOT {
            return Err(CoreError::invalid_operation("the root commit cannot be removed"));
        }
        let mut inner = self.inner.write();
        if inner.children.get(&id).is_some_and(|c| !c.is_empty()) {
            return Err(CoreError::invalid_operation(format!("commit {id} has children")));
        }
        catalog::remove(self.store.as_ref(), COMMITS, &id.as_u64().to_string())?;
        inner.unlink(id);
        Ok(())
    }

    /// Removes a set of commits that no branch head reaches.
    ///
    /// Every child of a removed commit must be removed with it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for the root or when a removed commit
    /// would leave a child behind.
    pub fn remove_dangling(&self, ids: &[CommitId]) -> CoreResult<usize> {
        let doomed: HashSet<CommitId> = ids.iter().copied().collect();
        let mut inner = self.inner.write();
        for id in &doomed {
            inner.get(*id)?;
            if *id == CommitId::ROOT {
                return Err(CoreError::invalid_operation("the root commit cannot be removed"));
            }
            let orphaned = inner
                .children
                .get(id)
                .into_iter()
                .flatten()
                .find(|child| !doomed.contains(*child));
            if let Some(child) = orphaned {
                return Err(CoreError::invalid_operation(format!(
                    "commit {id} still has child {child}"
                )));
            }
        }

        for id in &doomed {
            catalog::remove(self.store.as_ref(), COMMITS, &id.as_u64().to_string())?;
            inner.unlink(*id);
        }
        Ok(doomed.len())
    }

    /// Returns a commit.
    pub fn get(&self, id: CommitId) -> CoreResult<Arc<Commit>> {
        self.inner.read().get(id).cloned()
    }

    /// Whether the commit exists.
    #[must_use]
    pub fn contains(&self, id: CommitId) -> bool {
        self.inner.read().nodes.contains_key(&id)
    }

    /// The parents of a commit, in parent order.
    pub fn parents(&self, id: CommitId) -> CoreResult<Vec<Arc<Commit>>> {
        let inner = self.inner.read();
        let commit = inner.get(id)?;
        commit.parents.iter().map(|p| inner.get(*p).cloned()).collect()
    }

    /// The commits that name `id` as a parent, oldest first.
    pub fn children(&self, id: CommitId) -> CoreResult<Vec<Arc<Commit>>> {
        let inner = self.inner.read();
        inner.get(id)?;
        let mut children: Vec<Arc<Commit>> = inner
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .map(|c| inner.get(*c).cloned())
            .collect::<CoreResult<_>>()?;
        children.sort_by_key(|c| c.revision);
        Ok(children)
    }

    /// Whether `ancestor` is reachable from `descendant` through parent
    /// links. A commit is its own ancestor.
    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> CoreResult<bool> {
        let inner = self.inner.read();
        let floor = inner.get(ancestor)?.revision;
        inner.get(descendant)?;
        Ok(inner.walk(descendant, floor)?.contains(&ancestor))
    }

    /// `id` and all of its ancestors.
    pub fn ancestors(&self, id: CommitId) -> CoreResult<HashSet<CommitId>> {
        self.inner.read().walk(id, Revision::ZERO)
    }

    /// The common ancestor of `a` and `b` with the greatest revision.
    pub fn common_ancestor(&self, a: CommitId, b: CommitId) -> CoreResult<CommitId> {
        let inner = self.inner.read();
        let left = inner.walk(a, Revision::ZERO)?;
        let right = inner.walk(b, Revision::ZERO)?;
        left.intersection(&right)
            .copied()
            .max_by_key(|id| id.as_u64())
            .ok_or_else(|| CoreError::corrupt_state(format!("commits {a} and {b} share no ancestor")))
    }

    /// Keys written by commits reachable from `head` but not from `base`.
    pub fn touched_between(&self, base: CommitId, head: CommitId) -> CoreResult<BTreeSet<DocumentKey>> {
        let inner = self.inner.read();
        let known = inner.walk(base, Revision::ZERO)?;
        let mut touched = BTreeSet::new();
        for id in inner.walk(head, Revision::ZERO)?.difference(&known) {
            touched.extend(inner.get(*id)?.changes.iter().cloned());
        }
        Ok(touched)
    }

    /// Follows first parents from `head`, newest first.
    pub fn first_parent_history(&self, head: CommitId, limit: usize) -> CoreResult<Vec<Arc<Commit>>> {
        let inner = self.inner.read();
        let mut history = Vec::new();
        let mut next = Some(head);
        while let Some(id) = next {
            if history.len() == limit {
                break;
            }
            let commit = inner.get(id)?;
            next = commit.parents.first().copied();
            history.push(Arc::clone(commit));
        }
        Ok(history)
    }

    /// All commits, ordered by id.
    #[must_use]
    pub fn commits(&self) -> Vec<Arc<Commit>> {
        let mut commits: Vec<Arc<Commit>> = self.inner.read().nodes.values().cloned().collect();
        commits.sort_by_key(|c| c.id);
        commits
    }

    /// The greatest revision of any commit.
    #[must_use]
    pub fn max_revision(&self) -> Revision {
        self.inner
            .read()
            .nodes
            .values()
            .map(|c| c.revision)
            .max()
            .unwrap_or(Revision::ZERO)
    }

    /// The root commit's id.
    #[must_use]
    pub fn root(&self) -> CommitId {
        CommitId::ROOT
    }

    /// Number of commits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Always false once loaded: the root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    fn persist(&self, commit: &Commit) -> CoreResult<()> {
        catalog::write(self.store.as_ref(), COMMITS, &commit.id.as_u64().to_string(), commit)
    }
}

impl std::fmt::Debug for CommitGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraph")
            .field("commits", &self.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
