//! File manager for store files
//!
//! Manages the open store file, node caching, and locking.

pub mod node_store;
pub mod node_cache;
pub mod locking;

pub use node_store::{Appender, NodeStore};
pub use node_cache::{CacheStats, LruNodeCache, NodeCache};
pub use locking::{LockGuard, StoreLock};
