//! Snapshot-isolated transactions with optimistic commits.
//!
//! Verso transactions provide:
//! - **Snapshot isolation**: reads see the branch as of `begin`, plus the
//!   transaction's own writes
//! - **Optimistic concurrency**: nothing is locked while a transaction runs;
//!   conflicts are detected at commit time on whole documents
//! - **Atomic publication**: a commit becomes visible only when its branch
//!   head is swapped

mod manager;
mod state;
mod tracker;

pub(crate) use manager::visible_position;
pub use manager::TransactionManager;
pub use state::{PendingWrite, Transaction, TransactionState};
pub(crate) use tracker::OpenSet;
pub use tracker::{Snapshot, SnapshotTracker};
