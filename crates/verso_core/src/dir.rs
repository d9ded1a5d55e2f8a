//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK        # Advisory lock for single-process access
//! └─ store.log   # Append-only document store log
//! ```
//!
//! The LOCK file ensures only one process opens the database at a time.
//! Engine metadata (commits, branches, counters) lives inside the store log.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const STORE_FILE: &str = "store.log";

/// Holds the database directory and its exclusive lock.
///
/// Only one `DatabaseDir` can exist per directory at a time; the lock is
/// released when it is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `DatabaseLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found("database directory", path.display()));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the store log.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.path.join(STORE_FILE)
    }

    /// Whether the directory holds no data yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        fs::metadata(self.store_path()).map_or(true, |m| m.len() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert!(dir.is_new_database());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("nonexistent"), false);
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");

        let _dir1 = DatabaseDir::open(&db_path, true).unwrap();
        let result = DatabaseDir::open(&db_path, true);
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");

        {
            let _dir = DatabaseDir::open(&db_path, true).unwrap();
        }
        let _dir2 = DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn store_path_is_inside_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("paths_db");

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert_eq!(dir.store_path(), db_path.join("store.log"));
        assert_eq!(dir.path(), db_path.as_path());

        fs::write(dir.store_path(), b"x").unwrap();
        assert!(!dir.is_new_database());
    }
}
