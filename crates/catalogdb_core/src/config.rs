//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding engine state, engine WAL and one sub-directory per catalog.
    pub storage_directory: PathBuf,

    /// Whether to create the storage directory when it does not exist.
    pub create_if_missing: bool,

    /// Opens the engine without write access. Every mutating call fails.
    pub read_only: bool,

    /// Whether to fsync the catalog WAL on every commit.
    pub sync_on_commit: bool,

    /// Sessions idle longer than this are closed by the sweep thread.
    pub session_inactivity_timeout: Duration,

    /// How often the sweep thread looks for idle sessions.
    pub session_sweep_interval: Duration,

    /// Catalog WAL size that triggers a checkpoint after commit.
    pub checkpoint_wal_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_directory: PathBuf::from("catalogdb-data"),
            create_if_missing: true,
            read_only: false,
            sync_on_commit: true,
            session_inactivity_timeout: Duration::from_secs(60),
            session_sweep_interval: Duration::from_secs(1),
            checkpoint_wal_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at `storage_directory`.
    #[must_use]
    pub fn new(storage_directory: impl AsRef<Path>) -> Self {
        Self {
            storage_directory: storage_directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets whether to create a missing storage directory.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens the engine read-only.
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether to fsync the WAL on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the idle time after which sessions are closed.
    #[must_use]
    pub fn session_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.session_inactivity_timeout = timeout;
        self
    }

    /// Sets the sweep thread period.
    #[must_use]
    pub fn session_sweep_interval(mut self, interval: Duration) -> Self {
        self.session_sweep_interval = interval;
        self
    }

    /// Sets the WAL size that triggers a checkpoint.
    #[must_use]
    pub fn checkpoint_wal_size(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_size = bytes;
        self
    }
}
