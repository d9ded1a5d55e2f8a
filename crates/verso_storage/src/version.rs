//! Documents and their stored versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A document body. Any JSON value is accepted; collections usually hold
/// objects.
pub type Document = serde_json::Value;

/// The unit of time for versioned data.
///
/// Revisions are allocated once per successful commit and never reused.
/// Revision 0 belongs to the root commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// The root revision.
    pub const ZERO: Self = Self(0);

    /// Creates a revision from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Stable identifier of a document within its collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Half-open revision interval `[valid_from, valid_to)`.
///
/// `valid_to == None` means the version is still current (∞).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    /// First revision at which the version exists.
    pub valid_from: Revision,
    /// Revision at which the version was superseded, if it was.
    pub valid_to: Option<Revision>,
}

impl VersionRange {
    /// An open range starting at `valid_from`.
    #[must_use]
    pub const fn open(valid_from: Revision) -> Self {
        Self {
            valid_from,
            valid_to: None,
        }
    }

    /// The range covering every revision, used for internal bookkeeping
    /// records that are overwritten in place.
    #[must_use]
    pub const fn always() -> Self {
        Self::open(Revision::ZERO)
    }

    /// Whether `revision` falls inside the range.
    #[must_use]
    pub fn contains(&self, revision: Revision) -> bool {
        self.valid_from <= revision && self.valid_to.map_or(true, |to| revision < to)
    }

    /// Whether the version is still current.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Returns the range closed at `at`.
    #[must_use]
    pub const fn closed_at(self, at: Revision) -> Self {
        Self {
            valid_from: self.valid_from,
            valid_to: Some(at),
        }
    }

    /// Whether the bounds are well ordered.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid_to.map_or(true, |to| self.valid_from < to)
    }
}

/// One stored version of a document.
///
/// `commit` and `branch` are provenance tags supplied by the versioning
/// layer; the store keeps them verbatim and never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVersion {
    /// Revision interval in which this version is current on its lineage.
    pub range: VersionRange,
    /// Raw id of the commit that wrote the version.
    pub commit: u64,
    /// Branch the writing commit was made on.
    pub branch: String,
    /// The body, or `None` for a tombstone.
    pub document: Option<Document>,
}

impl StoredVersion {
    /// A live version.
    pub fn live(range: VersionRange, commit: u64, branch: impl Into<String>, document: Document) -> Self {
        Self {
            range,
            commit,
            branch: branch.into(),
            document: Some(document),
        }
    }

    /// A tombstone marking the document as removed.
    pub fn tombstone(range: VersionRange, commit: u64, branch: impl Into<String>) -> Self {
        Self {
            range,
            commit,
            branch: branch.into(),
            document: None,
        }
    }

    /// Whether this version records a removal.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.document.is_none()
    }
}
