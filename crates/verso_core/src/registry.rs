//! Branch registry.

use crate::catalog::{self, BRANCHES};
use crate::error::{CoreError, CoreResult};
use crate::types::CommitId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use verso_storage::DocumentStore;

#[derive(Debug, Serialize, Deserialize)]
struct BranchRecord {
    name: String,
    head: CommitId,
}

/// Named, mutable pointers into the commit graph.
///
/// Every mutation runs under a single gate: the `_branches` record is
/// written first and the in-memory head is published only after the write
/// succeeds. [`BranchRegistry::advance`] is the only point where commits
/// serialize.
pub struct BranchRegistry {
    store: Arc<dyn DocumentStore>,
    heads: RwLock<BTreeMap<String, CommitId>>,
    gate: Mutex<()>,
}

impl BranchRegistry {
    /// Loads all branches, creating `default_branch` at `root` when none
    /// exist.
    pub fn load(store: Arc<dyn DocumentStore>, default_branch: &str, root: CommitId) -> CoreResult<Self> {
        let mut heads = BTreeMap::new();
        for (key, record) in catalog::read_all::<BranchRecord>(store.as_ref(), BRANCHES)? {
            if key.as_str() != record.name {
                return Err(CoreError::corrupt_state(format!(
                    "branch record {key} holds branch {}",
                    record.name
                )));
            }
            heads.insert(record.name, record.head);
        }

        let registry = Self {
            store,
            heads: RwLock::new(heads),
            gate: Mutex::new(()),
        };
        if registry.heads.read().is_empty() {
            registry.create(default_branch, root)?;
        }
        debug!(branches = registry.heads.read().len(), "loaded branch registry");
        Ok(registry)
    }

    /// Creates a branch pointing at `from`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken and `InvalidOperation`
    /// for an empty name.
    pub fn create(&self, name: &str, from: CommitId) -> CoreResult<()> {
        check_name(name)?;
        let _gate = self.gate.lock();
        if self.heads.read().contains_key(name) {
            return Err(CoreError::already_exists("branch", name));
        }
        self.persist(name, from)?;
        self.heads.write().insert(name.to_string(), from);
        info!(branch = name, head = %from, "created branch");
        Ok(())
    }

    /// Returns a branch's head.
    pub fn head(&self, name: &str) -> CoreResult<CommitId> {
        self.heads
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::not_found("branch", name))
    }

    /// Moves `name` from `expected` to `new`.
    ///
    /// # Errors
    ///
    /// Returns `StaleHead` if the head is no longer `expected`.
    pub fn advance(&self, name: &str, expected: CommitId, new: CommitId) -> CoreResult<()> {
        let _gate = self.gate.lock();
        let current = self.head(name)?;
        if current != expected {
            return Err(CoreError::StaleHead {
                branch: name.to_string(),
            });
        }
        self.persist(name, new)?;
        self.heads.write().insert(name.to_string(), new);
        Ok(())
    }

    /// Deletes a branch. Its commits stay in the graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when it is the last branch.
    pub fn delete(&self, name: &str) -> CoreResult<CommitId> {
        let _gate = self.gate.lock();
        let head = self.head(name)?;
        if self.heads.read().len() == 1 {
            return Err(CoreError::invalid_operation(format!(
                "cannot delete the last branch: {name}"
            )));
        }
        catalog::remove(self.store.as_ref(), BRANCHES, name)?;
        self.heads.write().remove(name);
        info!(branch = name, head = %head, "deleted branch");
        Ok(head)
    }

    /// All branches with their heads, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<(String, CommitId)> {
        self.heads
            .read()
            .iter()
            .map(|(name, head)| (name.clone(), *head))
            .collect()
    }

    /// Every branch head.
    #[must_use]
    pub fn heads(&self) -> Vec<CommitId> {
        self.heads.read().values().copied().collect()
    }

    fn persist(&self, name: &str, head: CommitId) -> CoreResult<()> {
        let record = BranchRecord {
            name: name.to_string(),
            head,
        };
        catalog::write(self.store.as_ref(), BRANCHES, name, &record)
    }
}

fn check_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid_operation(format!("invalid branch name: {name:?}")));
    }
    Ok(())
}

impl std::fmt::Debug for BranchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchRegistry")
            .field("heads", &*self.heads.read())
            .finish_non_exhaustive()
    }
}
