//! Half-open range queries
//!
//! Both bounds are looked up first. The two paths pin the edges of the scan
//! at every level; the nodes in between are fetched level by level, keeping
//! only children whose key span can intersect `[start, end)`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use super::lookup::lookup;
use crate::error::{TreeError, TreeResult};
use crate::file_manager::node_store::NodeStore;
use crate::storage::node::{Node, NodePointer};
use crate::storage::value::Value;

/// All pairs with `start <= key < end`
pub fn range(
    store: &mut NodeStore,
    start: &[u8],
    end: &[u8],
) -> TreeResult<BTreeMap<Vec<u8>, Value>> {
    let mut result = BTreeMap::new();
    if start >= end {
        return Ok(result);
    }

    let start_path = lookup(store, start)?;
    let end_path = lookup(store, end)?;
    if start_path.len() != end_path.len() || start_path[0].0 != end_path[0].0 {
        return Err(TreeError::corrupt(
            "tree changed between range bound lookups",
        ));
    }

    let mut frontier: Vec<Arc<Node>> = vec![start_path[0].1.clone()];

    for level in 1..start_path.len() {
        frontier = next_level(store, &frontier, &start_path[level], &end_path[level], start, end)?;
    }

    for node in &frontier {
        match node.as_ref() {
            Node::Leaf(entries) => {
                for (key, value) in
                    entries.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
                {
                    result.insert(key.clone(), value.clone());
                }
            }
            Node::Internal(_) => {
                return Err(TreeError::corrupt("internal node found at the leaf level"));
            }
        }
    }

    Ok(result)
}

/// Children of `frontier` whose key span can intersect `[start, end)`.
/// Nodes already on one of the bound paths are reused instead of re-read.
fn next_level(
    store: &mut NodeStore,
    frontier: &[Arc<Node>],
    start_edge: &(NodePointer, Arc<Node>),
    end_edge: &(NodePointer, Arc<Node>),
    start: &[u8],
    end: &[u8],
) -> TreeResult<Vec<Arc<Node>>> {
    let mut children: BTreeMap<&[u8], NodePointer> = BTreeMap::new();
    for node in frontier {
        match node.as_ref() {
            Node::Internal(entries) => {
                children.extend(entries.iter().map(|(k, p)| (k.as_slice(), *p)));
            }
            Node::Leaf(_) => {
                return Err(TreeError::corrupt("leaf node found above the leaf level"));
            }
        }
    }

    let keys: Vec<(&[u8], NodePointer)> = children.into_iter().collect();
    let mut next = Vec::new();
    for (i, (key, pointer)) in keys.iter().enumerate() {
        // a child spans [key, next key); the last one is open-ended
        let spans_start = keys.get(i + 1).map_or(true, |(upper, _)| *upper > start);
        if *key >= end || !spans_start {
            continue;
        }

        let node = if *pointer == start_edge.0 {
            start_edge.1.clone()
        } else if *pointer == end_edge.0 {
            end_edge.1.clone()
        } else {
            store.get_node(*pointer)?
        };
        next.push(node);
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::node_cache::LruNodeCache;
    use crate::operations::mutation::apply;
    use tempfile::{tempdir, TempDir};

    fn open() -> (TempDir, NodeStore) {
        let dir = tempdir().unwrap();
        let mut store =
            NodeStore::open(&dir.path().join("t.tree"), Box::new(LruNodeCache::new(16)), false)
                .unwrap();
        store.initialize_if_empty().unwrap();
        (dir, store)
    }

    #[test]
    fn test_small_range() {
        let (_dir, mut store) = open();
        for k in ["a", "c", "e", "g"] {
            apply(&mut store, k.as_bytes(), Some(Value::from(k))).unwrap();
        }

        let found = range(&mut store, b"b", b"f").unwrap();
        let keys: Vec<_> = found.keys().cloned().collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"e".to_vec()]);
        assert_eq!(found[&b"c".to_vec()], Value::from("c"));
    }

    #[test]
    fn test_range_across_leaves() {
        let (_dir, mut store) = open();
        for i in 0..300 {
            let key = format!("{:05}", i);
            apply(&mut store, key.as_bytes(), Some(Value::Int(i))).unwrap();
        }

        let found = range(&mut store, b"00042", b"00250").unwrap();
        assert_eq!(found.len(), 208);
        assert_eq!(found.keys().next().unwrap(), b"00042");
        assert_eq!(found.keys().next_back().unwrap(), b"00249");

        let everything = range(&mut store, b"", b"99999").unwrap();
        assert_eq!(everything.len(), 300);
    }

    #[test]
    fn test_empty_and_inverted_bounds() {
        let (_dir, mut store) = open();
        apply(&mut store, b"m", Some(Value::Null)).unwrap();

        assert!(range(&mut store, b"m", b"m").unwrap().is_empty());
        assert!(range(&mut store, b"z", b"a").unwrap().is_empty());
        assert!(range(&mut store, b"n", b"z").unwrap().is_empty());
        assert_eq!(range(&mut store, b"m", b"n").unwrap().len(), 1);
    }
}
