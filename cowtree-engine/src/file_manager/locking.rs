//! Cross-process write lock for a store
//!
//! Mutations and compaction hold an advisory exclusive lock on a sidecar
//! `<store>.lock` file. The sidecar is never renamed, so the lock stays
//! meaningful when compaction swaps the data file.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::LockMode;
use crate::error::{TreeError, TreeResult};

/// Path of the sidecar lock file for a store
pub fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = OsString::from(store_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Handle on a store's lock file
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    /// Open (creating if needed) the lock file next to `store_path`
    pub fn open(store_path: &Path, mode: LockMode) -> TreeResult<Self> {
        let path = lock_path(store_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(StoreLock { file, path, mode })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the exclusive lock; it is released when the guard drops
    pub fn acquire(&self) -> TreeResult<LockGuard<'_>> {
        match self.mode {
            LockMode::Blocking => FileExt::lock_exclusive(&self.file)?,
            LockMode::NonBlocking => FileExt::try_lock_exclusive(&self.file).map_err(|e| {
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                {
                    TreeError::Locked
                } else {
                    TreeError::Io(e)
                }
            })?,
        }

        Ok(LockGuard { file: &self.file })
    }
}

/// Held exclusive lock
#[derive(Debug)]
pub struct LockGuard<'a> {
    file: &'a File,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            tracing::warn!("Failed to release store lock: {}", e);
        }
    }
}
