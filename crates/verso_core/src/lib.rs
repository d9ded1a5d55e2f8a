//! # Verso Core
//!
//! Branchable multi-version document engine.
//!
//! This crate provides:
//! - A commit graph with branches, merges and history queries
//! - Snapshot-isolated transactions with optimistic, whole-document
//!   conflict detection
//! - A monotonic revision counter that survives restarts
//! - Garbage collection of versions no branch or transaction can see
//!
//! Documents are JSON values kept by a [`verso_storage::DocumentStore`];
//! every write produces a new version tagged with the revision and commit
//! that created it. A transaction reads the newest version reachable from
//! its snapshot commit, so branches never observe each other's writes until
//! they are merged.
//!
//! ```rust
//! use verso_core::{CommitId, Database};
//! use serde_json::json;
//!
//! let db = Database::open_in_memory().unwrap();
//! db.transaction("main", |txn| txn.put("docs", "readme", json!("v1"))).unwrap();
//!
//! let head = db.current_head("main").unwrap();
//! db.create_branch("draft", head).unwrap();
//! db.transaction("draft", |txn| txn.put("docs", "readme", json!("v2"))).unwrap();
//!
//! let mut txn = db.begin_transaction("main").unwrap();
//! assert_eq!(db.get(&mut txn, "docs", "readme").unwrap(), Some(json!("v1")));
//! assert_ne!(head, CommitId::ROOT);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod counter;
mod database;
mod dir;
mod error;
mod gc;
mod graph;
mod registry;
mod transaction;
mod types;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use counter::RevisionCounter;
pub use database::{Database, DatabaseStats, MergeOutcome};
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult};
pub use gc::{GarbageCollector, GcReport};
pub use graph::{Commit, CommitGraph};
pub use registry::BranchRegistry;
pub use transaction::{
    PendingWrite, Snapshot, SnapshotTracker, Transaction, TransactionManager, TransactionState,
};
pub use types::{CommitId, DocumentKey, Revision, TransactionId};

// Re-export storage types used in the public API
pub use verso_storage::{CompactionStats, Document, DocumentId};
