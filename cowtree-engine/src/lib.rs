//! Cowtree Engine - embedded append-only copy-on-write B+tree store
//!
//! This crate provides a single-file key-value store. Every change appends
//! new nodes and a footer naming the new root; nothing is overwritten. A torn
//! trailing footer is recovered by scanning back to the last intact one, and
//! compaction rewrites only the live tree.

pub mod config;
pub mod error;
pub mod storage;
pub mod file_manager;
pub mod operations;
pub mod store;

pub use config::{LockMode, StoreConfig};
pub use error::{ErrorKind, TreeError, TreeResult};
pub use file_manager::CacheStats;
pub use operations::CompactionReport;
pub use storage::{Node, NodePointer, Value};
pub use store::Store;
