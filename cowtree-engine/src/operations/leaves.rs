//! Leaf enumeration

use std::collections::{BTreeMap, VecDeque};

use crate::error::{TreeError, TreeResult};
use crate::file_manager::node_store::NodeStore;
use crate::storage::node::{Node, NodePointer};

/// Every reachable leaf, keyed by its first key (empty for an empty root leaf)
pub fn leaves(store: &mut NodeStore) -> TreeResult<BTreeMap<Vec<u8>, NodePointer>> {
    let (root_pointer, root) = store.root()?;
    let mut found = BTreeMap::new();

    if root.is_leaf() {
        found.insert(first_key(&root), root_pointer);
        return Ok(found);
    }

    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        let Node::Internal(entries) = node.as_ref() else {
            return Err(TreeError::corrupt("leaf queued as an internal node"));
        };

        for pointer in entries.values() {
            let child = store.get_node(*pointer)?;
            if child.is_leaf() {
                found.insert(first_key(&child), *pointer);
            } else {
                queue.push_back(child);
            }
        }
    }

    Ok(found)
}

fn first_key(node: &Node) -> Vec<u8> {
    node.first_key().map(<[u8]>::to_vec).unwrap_or_default()
}
