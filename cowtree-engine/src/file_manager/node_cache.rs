//! Bounded cache of decoded nodes
//!
//! Nodes are immutable once written, so a pointer always maps to the same
//! node until compaction replaces the file. The store clears the cache when
//! that happens.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::storage::node::{Node, NodePointer};

/// Cache statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// What the node store needs from a cache
pub trait NodeCache: Send {
    /// Fetch a node, marking it as recently used
    fn get(&mut self, pointer: NodePointer) -> Option<Arc<Node>>;

    /// Insert a node, evicting another entry if the cache is full
    fn insert(&mut self, pointer: NodePointer, node: Arc<Node>);

    /// Drop every entry
    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;
}

/// Least-recently-used node cache
pub struct LruNodeCache {
    cache: LruCache<NodePointer, Arc<Node>>,
    stats: CacheStats,
}

impl LruNodeCache {
    /// Create a cache holding at most `capacity` nodes (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruNodeCache {
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl NodeCache for LruNodeCache {
    fn get(&mut self, pointer: NodePointer) -> Option<Arc<Node>> {
        match self.cache.get(&pointer) {
            Some(node) => {
                self.stats.hits += 1;
                Some(node.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, pointer: NodePointer, node: Arc<Node>) {
        if let Some((evicted, _)) = self.cache.push(pointer, node) {
            if evicted != pointer {
                self.stats.evictions += 1;
            }
        }
    }

    fn clear(&mut self) {
        self.cache.clear();
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn stats(&self) -> CacheStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::Value;
    use std::collections::BTreeMap;

    fn node(i: i64) -> Arc<Node> {
        let mut entries = BTreeMap::new();
        entries.insert(b"k".to_vec(), Value::Int(i));
        Arc::new(Node::Leaf(entries))
    }

    #[test]
    fn test_cache_basic() {
        let mut cache = LruNodeCache::new(10);
        cache.insert(0, node(1));

        let retrieved = cache.get(0);
        assert_eq!(retrieved.unwrap().get(b"k"), Some(&Value::Int(1)));
        assert!(cache.get(99).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruNodeCache::new(2);
        cache.insert(10, node(1));
        cache.insert(20, node(2));

        // touch 10 so 20 becomes the eviction victim
        assert!(cache.get(10).is_some());
        cache.insert(30, node(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(20).is_none());
        assert!(cache.get(10).is_some());
        assert!(cache.get(30).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinsert_is_not_eviction() {
        let mut cache = LruNodeCache::new(2);
        cache.insert(10, node(1));
        cache.insert(10, node(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear() {
        let mut cache = LruNodeCache::new(4);
        for i in 0..4 {
            cache.insert(i, node(i as i64));
        }
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = LruNodeCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
