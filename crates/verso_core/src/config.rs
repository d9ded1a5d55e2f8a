//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Branch created together with the root commit of a new database.
    pub default_branch: String,

    /// How many times a commit re-reads the branch head after losing the
    /// compare-and-swap before failing with `Busy`.
    pub max_commit_retries: u32,

    /// Number of revisions reserved per persisted high-water mark.
    ///
    /// 1 persists on every allocation. Larger blocks trade gaps in the
    /// revision sequence after a crash for fewer syncs.
    pub revision_block_size: u64,

    /// Whether to sync the store on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Format version to use for new databases.
    pub format_version: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            default_branch: "main".to_string(),
            max_commit_retries: 8,
            revision_block_size: 1,
            sync_on_commit: true,
            format_version: 1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the name of the initial branch.
    #[must_use]
    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    /// Sets the number of head re-reads a commit may make.
    #[must_use]
    pub const fn max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }

    /// Sets the revision reservation block size. Zero is treated as one.
    #[must_use]
    pub const fn revision_block_size(mut self, size: u64) -> Self {
        self.revision_block_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether to sync the store on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
