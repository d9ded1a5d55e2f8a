//! # Verso Storage
//!
//! Byte backends and versioned document stores for Verso.
//!
//! Two layers live here:
//!
//! - [`StorageBackend`] is an opaque byte store (read, append, flush, sync).
//!   [`InMemoryBackend`] and [`FileBackend`] implement it.
//! - [`DocumentStore`] keeps document versions addressed by
//!   `(collection, id, valid_from)`. [`MemoryStore`] holds them in maps;
//!   [`LogStore`] persists them as a checksummed append-only log on any
//!   backend.
//!
//! Neither layer knows about branches, commits or snapshots. Visibility is
//! decided by `verso_core`.
//!
//! ## Example
//!
//! ```rust
//! use verso_storage::{DocumentId, DocumentStore, MemoryStore, Revision, StoredVersion, VersionRange};
//!
//! let store = MemoryStore::new();
//! let id = DocumentId::from("a");
//! let version = StoredVersion::live(VersionRange::open(Revision::new(1)), 1, "main", serde_json::json!({"n": 1}));
//! store.put_version("docs", &id, version).unwrap();
//! assert!(store.get_version("docs", &id, Revision::new(5)).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod log_store;
mod mem_store;
mod memory;
mod record;
mod store;
mod version;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use log_store::{CompactionStats, LogStore};
pub use mem_store::MemoryStore;
pub use memory::InMemoryBackend;
pub use store::{DocumentStore, Scan, ScanFilter};
pub use version::{Document, DocumentId, Revision, StoredVersion, VersionRange};
