//! Node store - the open store file plus its node cache
//!
//! Reads go through the cache. Writes only ever append, through an
//! [`Appender`] that truncates the file back to where it started unless the
//! commit (the footer write) succeeds.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, info, warn};

use super::node_cache::{CacheStats, NodeCache};
use crate::error::{TreeError, TreeResult};
use crate::storage::footer::{locate_footer, Footer};
use crate::storage::node::{Node, NodePointer};

/// Open a store file for reading and appending, creating it if missing
pub fn open_store_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// Read and decode the record at `pointer`
pub fn read_node_at<R: Read + Seek>(r: &mut R, pointer: NodePointer) -> TreeResult<Node> {
    let truncated = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            TreeError::corrupt(format!("node record at {} is truncated", pointer))
        } else {
            TreeError::Io(e)
        }
    };

    r.seek(SeekFrom::Start(pointer as u64))?;
    let len = r.read_u32::<BigEndian>().map_err(truncated)? as u64;

    let mut payload = Vec::new();
    r.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(TreeError::corrupt(format!(
            "node record at {} is truncated ({} of {} bytes)",
            pointer,
            payload.len(),
            len
        )));
    }

    Node::decode(&payload)
}

fn fetch<R: Read + Seek>(
    file: &mut R,
    cache: &mut dyn NodeCache,
    pointer: NodePointer,
) -> TreeResult<Arc<Node>> {
    if let Some(node) = cache.get(pointer) {
        return Ok(node);
    }

    let node = Arc::new(read_node_at(file, pointer)?);
    debug!("Read node {} ({} entries)", pointer, node.len());
    cache.insert(pointer, node.clone());
    Ok(node)
}

/// Whether a footer candidate names a usable root. A corrupt or
/// out-of-place root is skipped; I/O errors abort recovery.
fn validate_candidate<R: Read + Seek>(
    file: &mut R,
    cache: &mut dyn NodeCache,
    footer: &Footer,
) -> TreeResult<bool> {
    if footer.root as u64 >= footer.offset {
        return Ok(false);
    }
    match fetch(file, cache, footer.root) {
        Ok(_) => Ok(true),
        Err(TreeError::Corrupt(reason)) => {
            debug!("Skipping footer at {}: {}", footer.offset, reason);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_: &fs::Metadata, _: &fs::Metadata) -> bool {
    true
}

/// An open store file with its node cache
pub struct NodeStore {
    path: PathBuf,
    file: File,
    cache: Box<dyn NodeCache>,
    sync_on_commit: bool,
}

impl NodeStore {
    /// Open the store file at `path`
    pub fn open(
        path: &Path,
        cache: Box<dyn NodeCache>,
        sync_on_commit: bool,
    ) -> TreeResult<Self> {
        let file = open_store_file(path)?;
        Ok(NodeStore {
            path: path.to_path_buf(),
            file,
            cache,
            sync_on_commit,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn file_len(&mut self) -> TreeResult<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    /// Write an empty leaf root if the file has no content yet.
    /// The caller must hold the store lock.
    pub fn initialize_if_empty(&mut self) -> TreeResult<bool> {
        if self.file_len()? != 0 {
            return Ok(false);
        }

        let mut appender = self.begin_append()?;
        let root = appender.append(&Node::empty_leaf())?;
        appender.commit(root)?;
        info!("Initialized empty store at {}", self.path.display());
        Ok(true)
    }

    /// Fetch a node by pointer, through the cache
    pub fn get_node(&mut self, pointer: NodePointer) -> TreeResult<Arc<Node>> {
        fetch(&mut self.file, self.cache.as_mut(), pointer)
    }

    /// Find the current root pointer, recovering from a torn trailing footer
    pub fn locate_root(&mut self) -> TreeResult<NodePointer> {
        let cache = self.cache.as_mut();
        let located = locate_footer(&mut self.file, |file, footer: &Footer| {
            validate_candidate(file, &mut *cache, footer)
        })?;

        let located = located.ok_or(TreeError::RootNotFound)?;
        if located.recovered {
            warn!(
                "Trailing footer of {} unusable; recovered root {} from footer at offset {}",
                self.path.display(),
                located.footer.root,
                located.footer.offset
            );
        }
        Ok(located.footer.root)
    }

    /// Fetch the current root node together with its pointer
    pub fn root(&mut self) -> TreeResult<(NodePointer, Arc<Node>)> {
        let pointer = self.locate_root()?;
        Ok((pointer, self.get_node(pointer)?))
    }

    /// Start appending at end of file
    pub fn begin_append(&mut self) -> TreeResult<Appender<'_>> {
        let end = self.file_len()?;
        Ok(Appender {
            store: self,
            rollback: end,
            cursor: end,
            nodes_written: 0,
            committed: false,
        })
    }

    /// Reopen the path if another handle replaced the file (compaction).
    /// Returns true when the handle was switched.
    pub fn reopen_if_replaced(&mut self) -> TreeResult<bool> {
        let on_disk = fs::metadata(&self.path)?;
        if same_file(&self.file.metadata()?, &on_disk) {
            return Ok(false);
        }

        info!("{} was replaced on disk; reopening", self.path.display());
        self.replace_file(open_store_file(&self.path)?);
        Ok(true)
    }

    /// Switch to a new file generation. Every cached pointer becomes void.
    pub fn replace_file(&mut self, file: File) {
        self.file = file;
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.len()
    }
}

/// In-flight append session.
///
/// Nodes appended here are not cached. Dropping an uncommitted appender
/// truncates the file back to its starting length.
pub struct Appender<'a> {
    store: &'a mut NodeStore,
    rollback: u64,
    cursor: u64,
    nodes_written: usize,
    committed: bool,
}

impl Appender<'_> {
    /// Read a committed node while appending
    pub fn get_node(&mut self, pointer: NodePointer) -> TreeResult<Arc<Node>> {
        self.store.get_node(pointer)
    }

    /// Append a node record and return its pointer
    pub fn append(&mut self, node: &Node) -> TreeResult<NodePointer> {
        let pointer = NodePointer::try_from(self.cursor).map_err(|_| {
            TreeError::corrupt("store exceeds the 32-bit node pointer range")
        })?;

        let record = node.encode_record()?;
        let file = &mut self.store.file;
        file.seek(SeekFrom::Start(self.cursor))?;
        file.write_all(&record)?;

        self.cursor += record.len() as u64;
        self.nodes_written += 1;
        Ok(pointer)
    }

    pub fn nodes_written(&self) -> usize {
        self.nodes_written
    }

    /// Write the footer naming `root`; this is the commit point
    pub fn commit(mut self, root: NodePointer) -> TreeResult<()> {
        let footer = Footer::encode(root)?;
        let sync = self.store.sync_on_commit;
        let file = &mut self.store.file;

        file.flush()?;
        file.seek(SeekFrom::Start(self.cursor))?;
        file.write_all(&footer)?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }

        debug!(
            "Committed root {} ({} nodes, {} bytes appended)",
            root,
            self.nodes_written,
            self.cursor + footer.len() as u64 - self.rollback
        );
        self.committed = true;
        Ok(())
    }
}

impl Drop for Appender<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        if self.cursor != self.rollback {
            warn!(
                "Rolling back {} uncommitted bytes in {}",
                self.cursor - self.rollback,
                self.store.path.display()
            );
        }
        if let Err(e) = self.store.file.set_len(self.rollback) {
            warn!("Rollback truncate failed: {}", e);
        }
    }
}
