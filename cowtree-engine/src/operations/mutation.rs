//! Copy-on-write insert and delete
//!
//! A mutation rewrites the path from the edited leaf up to the root. Each
//! level is merged with a sibling when it runs low, split when it overflows,
//! appended, and relinked into a copy of its parent. The footer naming the
//! new root is written last; until then nothing on disk refers to the new
//! nodes.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::debug;

use super::lookup::lookup;
use crate::error::{TreeError, TreeResult};
use crate::file_manager::node_store::NodeStore;
use crate::storage::node::{Node, NodePointer, MERGE_THRESHOLD};
use crate::storage::value::Value;

/// Set `key` to `value`, or delete it when `value` is `None`.
/// Returns the pointer of the new root.
pub fn apply(store: &mut NodeStore, key: &[u8], value: Option<Value>) -> TreeResult<NodePointer> {
    let mut path: Vec<Node> = lookup(store, key)?
        .into_iter()
        .map(|(_, node)| Node::clone(&node))
        .collect();

    let mut node = path
        .pop()
        .ok_or_else(|| TreeError::corrupt("lookup returned an empty path"))?;
    let mut index = node.first_key().map(<[u8]>::to_vec);

    match (&mut node, value) {
        (Node::Leaf(entries), Some(value)) => {
            entries.insert(key.to_vec(), value);
        }
        (Node::Leaf(entries), None) => {
            entries.remove(key);
        }
        (Node::Internal(_), _) => {
            return Err(TreeError::corrupt("lookup did not end at a leaf"));
        }
    }

    let mut appender = store.begin_append()?;

    let root = loop {
        let mut parent = match path.pop() {
            Some(Node::Internal(entries)) => Some(entries),
            Some(Node::Leaf(_)) => {
                return Err(TreeError::corrupt("leaf node found above the leaf level"));
            }
            None => None,
        };
        // the parent's own separator in the grandparent, before any edits
        let parent_index = parent.as_ref().and_then(|p| p.keys().next().cloned());

        if let Some(entries) = parent.as_mut() {
            let own = index
                .as_deref()
                .filter(|own| entries.contains_key(*own))
                .ok_or_else(|| TreeError::corrupt("child separator missing from parent"))?;

            if node.len() <= MERGE_THRESHOLD {
                if let Some((sibling_key, sibling_pointer)) = sibling(entries, own) {
                    let sibling = appender.get_node(sibling_pointer)?;
                    node.absorb(Node::clone(&sibling))?;
                    entries.remove(&sibling_key);
                    debug!(
                        "Merged sibling {} into underfull node ({} entries)",
                        sibling_pointer,
                        node.len()
                    );
                }
            }

            entries.remove(own);
        }

        let mut upnode = parent.unwrap_or_default();

        if node.is_empty() {
            if upnode.is_empty() && path.is_empty() {
                break appender.append(&Node::empty_leaf())?;
            }
        } else {
            for chunk in node.split() {
                let pointer = appender.append(&chunk)?;
                let first = chunk.first_key().map(<[u8]>::to_vec).unwrap_or_default();
                upnode.insert(first, pointer);
            }
        }

        if path.is_empty() && upnode.len() == 1 {
            if let Some(pointer) = upnode.values().next() {
                break *pointer;
            }
        }

        node = Node::Internal(upnode);
        index = parent_index;
    };

    let written = appender.nodes_written();
    appender.commit(root)?;
    debug!("Mutation committed: {} nodes written, root {}", written, root);
    Ok(root)
}

/// Adjacent sibling of the child at `own`: the left one, else the right one
fn sibling(
    entries: &BTreeMap<Vec<u8>, NodePointer>,
    own: &[u8],
) -> Option<(Vec<u8>, NodePointer)> {
    entries
        .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(own)))
        .next_back()
        .or_else(|| {
            entries
                .range::<[u8], _>((Bound::Excluded(own), Bound::Unbounded))
                .next()
        })
        .map(|(key, pointer)| (key.clone(), *pointer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::node_cache::LruNodeCache;
    use crate::operations::lookup::get;
    use tempfile::{tempdir, TempDir};

    fn open() -> (TempDir, NodeStore) {
        let dir = tempdir().unwrap();
        let mut store =
            NodeStore::open(&dir.path().join("t.tree"), Box::new(LruNodeCache::new(64)), false)
                .unwrap();
        store.initialize_if_empty().unwrap();
        (dir, store)
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{:04}", i).into_bytes()
    }

    fn root_node(store: &mut NodeStore) -> Node {
        let (_, root) = store.root().unwrap();
        Node::clone(&root)
    }

    #[test]
    fn test_sibling_preference() {
        let mut entries = BTreeMap::new();
        entries.insert(b"a".to_vec(), 1);
        entries.insert(b"f".to_vec(), 2);
        entries.insert(b"k".to_vec(), 3);

        assert_eq!(sibling(&entries, b"f"), Some((b"a".to_vec(), 1)));
        assert_eq!(sibling(&entries, b"a"), Some((b"f".to_vec(), 2)));
        assert_eq!(sibling(&entries, b"k"), Some((b"f".to_vec(), 2)));

        let mut single = BTreeMap::new();
        single.insert(b"a".to_vec(), 1);
        assert_eq!(sibling(&single, b"a"), None);
    }

    #[test]
    fn test_insert_into_root_leaf() {
        let (_dir, mut store) = open();
        apply(&mut store, b"x", Some(Value::Int(1))).unwrap();
        apply(&mut store, b"y", Some(Value::Int(2))).unwrap();

        let root = root_node(&mut store);
        assert!(root.is_leaf());
        assert_eq!(root.len(), 2);
        assert_eq!(get(&mut store, b"y").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_seventeen_keys_split_root() {
        let (_dir, mut store) = open();
        for i in 0..17 {
            apply(&mut store, &key(i), Some(Value::Int(i as i64))).unwrap();
        }

        match root_node(&mut store) {
            Node::Internal(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries.keys().next().unwrap(), &key(0));
            }
            Node::Leaf(_) => panic!("root should have split"),
        }

        for i in 0..17 {
            assert_eq!(get(&mut store, &key(i)).unwrap(), Some(Value::Int(i as i64)));
        }
    }

    #[test]
    fn test_delete_merges_back_into_root_leaf() {
        let (_dir, mut store) = open();
        for i in 0..17 {
            apply(&mut store, &key(i), Some(Value::Int(i as i64))).unwrap();
        }
        // 9 + 8 split; deleting from the right leaf (8 entries) forces a merge
        apply(&mut store, &key(16), None).unwrap();

        let root = root_node(&mut store);
        assert!(root.is_leaf());
        assert_eq!(root.len(), 16);
        for i in 0..16 {
            assert!(get(&mut store, &key(i)).unwrap().is_some());
        }
        assert_eq!(get(&mut store, &key(16)).unwrap(), None);
    }

    #[test]
    fn test_key_smaller_than_all_separators() {
        let (_dir, mut store) = open();
        for i in 10..40 {
            apply(&mut store, &key(i), Some(Value::Int(i as i64))).unwrap();
        }
        apply(&mut store, &key(1), Some(Value::Null)).unwrap();

        match root_node(&mut store) {
            Node::Internal(entries) => assert_eq!(entries.keys().next().unwrap(), &key(1)),
            Node::Leaf(_) => panic!("expected internal root"),
        }
        assert_eq!(get(&mut store, &key(1)).unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_delete_everything_leaves_empty_root() {
        let (_dir, mut store) = open();
        for i in 0..100 {
            apply(&mut store, &key(i), Some(Value::Int(i as i64))).unwrap();
        }
        for i in 0..100 {
            apply(&mut store, &key(i), None).unwrap();
        }

        let root = root_node(&mut store);
        assert!(root.is_leaf());
        assert!(root.is_empty());
    }

    #[test]
    fn test_delete_missing_key() {
        let (_dir, mut store) = open();
        apply(&mut store, b"a", Some(Value::Bool(true))).unwrap();
        apply(&mut store, b"zzz", None).unwrap();
        assert_eq!(get(&mut store, b"a").unwrap(), Some(Value::Bool(true)));
    }
}
