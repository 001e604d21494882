//! Key lookup: root-to-leaf descent

use std::sync::Arc;

use crate::error::{TreeError, TreeResult};
use crate::file_manager::node_store::NodeStore;
use crate::storage::node::{Node, NodePointer};
use crate::storage::value::Value;

/// Deepest tree accepted before the descent is treated as a pointer cycle
pub const MAX_HEIGHT: usize = 64;

/// Nodes visited by a lookup, root first, leaf last
pub type TreePath = Vec<(NodePointer, Arc<Node>)>;

/// Descend from the current root to the leaf responsible for `key`
pub fn lookup(store: &mut NodeStore, key: &[u8]) -> TreeResult<TreePath> {
    let (mut pointer, mut node) = store.root()?;
    let mut path = TreePath::new();

    loop {
        if node.is_leaf() {
            path.push((pointer, node));
            return Ok(path);
        }

        let child = node
            .find_child(key)
            .ok_or_else(|| TreeError::corrupt(format!("internal node {} is empty", pointer)))?;
        path.push((pointer, node));

        if path.len() >= MAX_HEIGHT {
            return Err(TreeError::corrupt("tree deeper than any valid store"));
        }

        pointer = child;
        node = store.get_node(child)?;
    }
}

/// Value stored under `key`, if any
pub fn get(store: &mut NodeStore, key: &[u8]) -> TreeResult<Option<Value>> {
    let path = lookup(store, key)?;
    Ok(path.last().and_then(|(_, leaf)| leaf.get(key).cloned()))
}
