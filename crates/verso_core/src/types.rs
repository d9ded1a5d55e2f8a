//! Core type definitions for Verso.

use serde::{Deserialize, Serialize};
use std::fmt;
use verso_storage::DocumentId;

pub use verso_storage::Revision;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier of a node in the commit graph.
///
/// A commit's id carries the same number as its revision. The two are kept
/// as separate types because one names a node and the other a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub u64);

impl CommitId {
    /// The root commit.
    pub const ROOT: Self = Self(0);

    /// Creates a commit ID from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The id a commit made at `revision` receives.
    #[must_use]
    pub const fn for_revision(revision: Revision) -> Self {
        Self(revision.as_u64())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A document address: collection plus id.
///
/// Conflict detection works on whole keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Collection name.
    pub collection: String,
    /// Document id within the collection.
    pub id: DocumentId,
}

impl DocumentKey {
    /// Creates a key.
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn commit_id_follows_revision() {
        let id = CommitId::for_revision(Revision::new(9));
        assert_eq!(id.as_u64(), 9);
        assert_eq!(format!("{id}"), "c9");
    }

    #[test]
    fn keys_order_by_collection_then_id() {
        let a = DocumentKey::new("a", "2");
        let b = DocumentKey::new("b", "1");
        assert!(a < b);
        assert_eq!(b.to_string(), "b/1");
    }
}
