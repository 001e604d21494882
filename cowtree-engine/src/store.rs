//! Store handle - the public entry point
//!
//! A [`Store`] owns the open node store and the sidecar lock. Calls are
//! serialized in-process by a mutex; mutations and compaction additionally
//! hold the cross-process file lock for their whole duration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::TreeResult;
use crate::file_manager::locking::StoreLock;
use crate::file_manager::node_cache::{CacheStats, LruNodeCache};
use crate::file_manager::node_store::NodeStore;
use crate::operations::compact::{self, CompactionReport};
use crate::operations::{leaves, lookup, mutation, range};
use crate::storage::node::NodePointer;
use crate::storage::value::Value;

/// An open cowtree store
pub struct Store {
    path: PathBuf,
    config: StoreConfig,
    lock: StoreLock,
    inner: Mutex<NodeStore>,
}

impl Store {
    /// Open the store at `path` with default settings, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> TreeResult<Self> {
        Self::open_with(path, StoreConfig::default())
    }

    /// Open the store at `path`, creating an empty one when the file is
    /// missing or zero-length
    pub fn open_with(path: impl AsRef<Path>, config: StoreConfig) -> TreeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = StoreLock::open(&path, config.lock_mode)?;
        let cache = LruNodeCache::new(config.cache_capacity);
        let capacity = cache.capacity();
        let mut store = NodeStore::open(&path, Box::new(cache), config.sync_on_commit)?;

        if store.file_len()? == 0 {
            let _guard = lock.acquire()?;
            store.initialize_if_empty()?;
        }

        let root = store.locate_root()?;
        info!(
            "Opened store {} (root {}, cache capacity {}, lock file {})",
            path.display(),
            root,
            capacity,
            lock.path().display()
        );

        Ok(Store {
            path,
            config,
            lock,
            inner: Mutex::new(store),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Value stored under `key`, if any
    pub fn get(&self, key: &[u8]) -> TreeResult<Option<Value>> {
        let mut store = self.inner.lock();
        store.reopen_if_replaced()?;
        let value = lookup::get(&mut store, key)?;
        debug!("get {:?}: {}", String::from_utf8_lossy(key), value.is_some());
        Ok(value)
    }

    /// Insert or overwrite `key`
    pub fn set(&self, key: &[u8], value: Value) -> TreeResult<()> {
        self.mutate(key, Some(value))
    }

    /// Remove `key`; removing an absent key succeeds
    pub fn delete(&self, key: &[u8]) -> TreeResult<()> {
        self.mutate(key, None)
    }

    fn mutate(&self, key: &[u8], value: Option<Value>) -> TreeResult<()> {
        let mut store = self.inner.lock();
        let _guard = self.lock.acquire()?;
        store.reopen_if_replaced()?;
        mutation::apply(&mut store, key, value)?;
        Ok(())
    }

    /// All pairs with `start <= key < end`
    pub fn range(&self, start: &[u8], end: &[u8]) -> TreeResult<BTreeMap<Vec<u8>, Value>> {
        let mut store = self.inner.lock();
        store.reopen_if_replaced()?;
        range::range(&mut store, start, end)
    }

    /// Pointer of every leaf, keyed by the leaf's first key
    pub fn leaves(&self) -> TreeResult<BTreeMap<Vec<u8>, NodePointer>> {
        let mut store = self.inner.lock();
        store.reopen_if_replaced()?;
        leaves::leaves(&mut store)
    }

    /// Rewrite the live tree into a fresh file, dropping superseded nodes.
    /// Every pointer handed out before this call becomes invalid.
    pub fn compact(&self) -> TreeResult<CompactionReport> {
        let mut store = self.inner.lock();
        let _guard = self.lock.acquire()?;
        store.reopen_if_replaced()?;
        compact::compact(&mut store)
    }

    /// Pointer of the current root node
    pub fn root_pointer(&self) -> TreeResult<NodePointer> {
        let mut store = self.inner.lock();
        store.reopen_if_replaced()?;
        store.locate_root()
    }

    /// Current store file length in bytes
    pub fn file_len(&self) -> TreeResult<u64> {
        let mut store = self.inner.lock();
        store.reopen_if_replaced()?;
        store.file_len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().cache_stats()
    }
}
