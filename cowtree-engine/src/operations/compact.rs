//! Offline compaction
//!
//! Copies the live tree into a fresh file, children before parents, so every
//! parent is written with its children's new pointers. The copy replaces the
//! store file with an atomic rename; superseded versions are left behind.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{TreeError, TreeResult};
use crate::file_manager::node_store::NodeStore;
use crate::storage::footer::Footer;
use crate::storage::node::{Node, NodePointer};

/// Outcome of a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub nodes_written: usize,
}

/// Sequential writer for the replacement file
struct CopyWriter<W: Write> {
    out: W,
    cursor: u64,
    nodes_written: usize,
}

impl<W: Write> CopyWriter<W> {
    fn append(&mut self, node: &Node) -> TreeResult<NodePointer> {
        let pointer = NodePointer::try_from(self.cursor).map_err(|_| {
            TreeError::corrupt("compacted store exceeds the 32-bit node pointer range")
        })?;
        let record = node.encode_record()?;
        self.out.write_all(&record)?;
        self.cursor += record.len() as u64;
        self.nodes_written += 1;
        Ok(pointer)
    }
}

/// An internal node whose children are still being copied
struct Pending {
    /// Separator under which the parent refers to this node
    separator: Vec<u8>,
    node: Arc<Node>,
    next_child: usize,
    copied: BTreeMap<Vec<u8>, NodePointer>,
}

/// Copy the tree under `root` post-order; returns the new root pointer
fn copy_tree<W: Write>(
    store: &mut NodeStore,
    writer: &mut CopyWriter<W>,
    root: NodePointer,
) -> TreeResult<NodePointer> {
    let mut stack = vec![Pending {
        separator: Vec::new(),
        node: store.get_node(root)?,
        next_child: 0,
        copied: BTreeMap::new(),
    }];

    loop {
        let Some(top) = stack.last_mut() else {
            return Err(TreeError::corrupt("compaction stack emptied early"));
        };

        let next = match top.node.as_ref() {
            Node::Internal(entries) => entries
                .iter()
                .nth(top.next_child)
                .map(|(key, pointer)| (key.clone(), *pointer)),
            Node::Leaf(_) => None,
        };

        if let Some((separator, child)) = next {
            top.next_child += 1;
            let node = store.get_node(child)?;
            stack.push(Pending {
                separator,
                node,
                next_child: 0,
                copied: BTreeMap::new(),
            });
            continue;
        }

        // all children copied: write this node
        let Some(done) = stack.pop() else {
            return Err(TreeError::corrupt("compaction stack emptied early"));
        };
        let pointer = match done.node.as_ref() {
            Node::Leaf(_) => writer.append(&done.node)?,
            Node::Internal(_) => writer.append(&Node::Internal(done.copied))?,
        };

        match stack.last_mut() {
            Some(parent) => {
                parent.copied.insert(done.separator, pointer);
            }
            None => return Ok(pointer),
        }
    }
}

/// Rewrite the reachable tree into a new file and swap it in.
/// The caller must hold the store lock.
pub fn compact(store: &mut NodeStore) -> TreeResult<CompactionReport> {
    let bytes_before = store.file_len()?;
    let root = store.locate_root()?;

    let dir = match store.path().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let mut temp = NamedTempFile::new_in(&dir)?;

    let (new_root, bytes_after, nodes_written) = {
        let mut writer = CopyWriter {
            out: BufWriter::new(temp.as_file_mut()),
            cursor: 0,
            nodes_written: 0,
        };
        let new_root = copy_tree(store, &mut writer, root)?;

        let footer = Footer::encode(new_root)?;
        writer.out.write_all(&footer)?;
        writer.out.flush()?;
        (
            new_root,
            writer.cursor + footer.len() as u64,
            writer.nodes_written,
        )
    };
    temp.as_file().sync_all()?;

    let file = temp
        .persist(store.path())
        .map_err(|e| TreeError::Io(e.error))?;
    store.replace_file(file);

    let report = CompactionReport {
        bytes_before,
        bytes_after,
        nodes_written,
    };
    info!(
        "Compacted {}: {} -> {} bytes, {} nodes, new root {}",
        store.path().display(),
        bytes_before,
        bytes_after,
        nodes_written,
        new_root
    );
    Ok(report)
}
