//! Store configuration

use serde::{Deserialize, Serialize};

/// Default number of decoded nodes kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// What a writer does when another process holds the store lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Wait until the lock is granted
    #[default]
    Blocking,
    /// Fail immediately with `TreeError::Locked`
    NonBlocking,
}

/// Tunables for an open store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Node cache capacity (number of nodes)
    pub cache_capacity: usize,
    /// Lock acquisition policy for mutations and compaction
    pub lock_mode: LockMode,
    /// fsync the file after every footer write
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            lock_mode: LockMode::Blocking,
            sync_on_commit: true,
        }
    }
}
