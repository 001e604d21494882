//! B+ tree nodes and their on-disk payload
//!
//! A node is either a leaf (key → value) or an internal node
//! (separator key → child pointer). Both are kept as `BTreeMap`s so keys are
//! always sorted and unique. The separator for a child is the child's first
//! key.
//!
//! ## Payload layout
//! ```text
//! [0..2]  kind tag: "kv" (leaf) or "kp" (internal)
//! [2]     codec version
//! [3..7]  entry count: u32
//! entries: key_len:u32 key  then a Value (leaf) or pointer:u32 (internal)
//! ```
//!
//! On disk every payload is framed as a record: `[len:u32][payload]`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::ops::Bound;

use super::value::{invalid, len_u32, read_bytes, write_bytes, Value};
use crate::error::{TreeError, TreeResult};

/// Absolute file offset of a node record
pub type NodePointer = u32;

/// Maximum number of entries per node
pub const NODE_SLOTS: usize = 16;

/// Entry count at or below which a node is merged with a sibling
pub const MERGE_THRESHOLD: usize = NODE_SLOTS / 2;

/// Version byte written after the kind tag
pub const CODEC_VERSION: u8 = 1;

/// Size of the record length prefix
pub const RECORD_PREFIX_SIZE: usize = 4;

/// Node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Key → value node
    Leaf,
    /// Key → child pointer node
    Internal,
}

impl NodeKind {
    /// Two-byte tag stored at the start of the payload
    pub fn tag(&self) -> &'static [u8; 2] {
        match self {
            NodeKind::Leaf => b"kv",
            NodeKind::Internal => b"kp",
        }
    }

    pub fn from_tag(tag: &[u8; 2]) -> Option<Self> {
        match tag {
            b"kv" => Some(NodeKind::Leaf),
            b"kp" => Some(NodeKind::Internal),
            _ => None,
        }
    }
}

/// A decoded tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(BTreeMap<Vec<u8>, Value>),
    Internal(BTreeMap<Vec<u8>, NodePointer>),
}

impl Node {
    /// The root of a fresh store
    pub fn empty_leaf() -> Self {
        Node::Leaf(BTreeMap::new())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Leaf(_) => NodeKind::Leaf,
            Node::Internal(_) => NodeKind::Internal,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind() == NodeKind::Leaf
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries.len(),
            Node::Internal(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key in the node
    pub fn first_key(&self) -> Option<&[u8]> {
        match self {
            Node::Leaf(entries) => entries.keys().next().map(Vec::as_slice),
            Node::Internal(entries) => entries.keys().next().map(Vec::as_slice),
        }
    }

    /// Look up a key in a leaf node
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Node::Leaf(entries) => entries.get(key),
            Node::Internal(_) => None,
        }
    }

    /// Child to descend into for `key`: the rightmost separator <= key,
    /// or the leftmost child when key sorts before every separator
    pub fn find_child(&self, key: &[u8]) -> Option<NodePointer> {
        match self {
            Node::Internal(entries) => entries
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
                .next_back()
                .or_else(|| entries.iter().next())
                .map(|(_, ptr)| *ptr),
            Node::Leaf(_) => None,
        }
    }

    /// Move all entries of `other` into this node
    pub fn absorb(&mut self, other: Node) -> TreeResult<()> {
        match (self, other) {
            (Node::Leaf(mine), Node::Leaf(theirs)) => mine.extend(theirs),
            (Node::Internal(mine), Node::Internal(theirs)) => mine.extend(theirs),
            (me, other) => {
                return Err(TreeError::corrupt(format!(
                    "cannot merge {:?} node into {:?} node",
                    other.kind(),
                    me.kind()
                )))
            }
        }
        Ok(())
    }

    /// Split into balanced, key-ordered chunks of at most `NODE_SLOTS` entries
    pub fn split(self) -> Vec<Node> {
        match self {
            Node::Leaf(entries) => split_entries(entries).into_iter().map(Node::Leaf).collect(),
            Node::Internal(entries) => split_entries(entries)
                .into_iter()
                .map(Node::Internal)
                .collect(),
        }
    }

    /// Serialize the node payload (kind tag + mapping)
    pub fn encode(&self) -> TreeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        buf.write_all(self.kind().tag())?;
        buf.write_u8(CODEC_VERSION)?;
        buf.write_u32::<BigEndian>(len_u32(self.len())?)?;

        match self {
            Node::Leaf(entries) => {
                for (key, value) in entries {
                    write_bytes(&mut buf, key)?;
                    value.write_to(&mut buf)?;
                }
            }
            Node::Internal(entries) => {
                for (key, ptr) in entries {
                    write_bytes(&mut buf, key)?;
                    buf.write_u32::<BigEndian>(*ptr)?;
                }
            }
        }

        Ok(buf)
    }

    /// Serialize the node as a length-prefixed record
    pub fn encode_record(&self) -> TreeResult<Vec<u8>> {
        let payload = self.encode()?;
        let mut record = Vec::with_capacity(RECORD_PREFIX_SIZE + payload.len());
        record.write_u32::<BigEndian>(len_u32(payload.len())?)?;
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Parse a node payload produced by [`Node::encode`]
    pub fn decode(payload: &[u8]) -> TreeResult<Self> {
        Self::parse(payload)
            .map_err(|e| TreeError::corrupt(format!("undecodable node: {}", e)))
    }

    fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(payload);

        let mut tag = [0u8; 2];
        cursor.read_exact(&mut tag)?;
        let kind = NodeKind::from_tag(&tag).ok_or_else(|| invalid("unknown node tag"))?;

        let version = cursor.read_u8()?;
        if version != CODEC_VERSION {
            return Err(invalid(format!("unsupported codec version {}", version)));
        }

        let count = cursor.read_u32::<BigEndian>()?;
        let node = match kind {
            NodeKind::Leaf => {
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = read_ordered_key(&mut cursor, entries.keys().next_back())?;
                    let value = Value::read_from(&mut cursor)?;
                    entries.insert(key, value);
                }
                Node::Leaf(entries)
            }
            NodeKind::Internal => {
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = read_ordered_key(&mut cursor, entries.keys().next_back())?;
                    let ptr = cursor.read_u32::<BigEndian>()?;
                    entries.insert(key, ptr);
                }
                Node::Internal(entries)
            }
        };

        if cursor.position() as usize != payload.len() {
            return Err(invalid("trailing bytes after node"));
        }

        Ok(node)
    }
}

fn read_ordered_key<R: Read>(r: &mut R, last: Option<&Vec<u8>>) -> io::Result<Vec<u8>> {
    let key = read_bytes(r)?;
    if last.is_some_and(|prev| *prev >= key) {
        return Err(invalid("node keys out of order"));
    }
    Ok(key)
}

/// Number of entries per chunk when splitting `n` entries
pub fn chunk_size(n: usize) -> usize {
    if n <= NODE_SLOTS {
        return n.max(1);
    }
    n.div_ceil(n.div_ceil(NODE_SLOTS))
}

fn split_entries<V>(entries: BTreeMap<Vec<u8>, V>) -> Vec<BTreeMap<Vec<u8>, V>> {
    if entries.len() <= NODE_SLOTS {
        return vec![entries];
    }

    let size = chunk_size(entries.len());
    let mut chunks = Vec::new();
    let mut current = BTreeMap::new();
    for (key, value) in entries {
        current.insert(key, value);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: impl IntoIterator<Item = u32>) -> Node {
        Node::Leaf(
            keys.into_iter()
                .map(|i| (format!("k{:03}", i).into_bytes(), Value::Int(i as i64)))
                .collect(),
        )
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_size(16), 16);
        assert_eq!(chunk_size(17), 9);
        assert_eq!(chunk_size(24), 12);
        assert_eq!(chunk_size(33), 11);
        assert_eq!(chunk_size(49), 13);
    }

    #[test]
    fn test_split_balanced() {
        let chunks = leaf(0..17).split();
        let sizes: Vec<_> = chunks.iter().map(Node::len).collect();
        assert_eq!(sizes, vec![9, 8]);
        assert_eq!(chunks[0].first_key(), Some(&b"k000"[..]));
        assert_eq!(chunks[1].first_key(), Some(&b"k009"[..]));

        let chunks = leaf(0..16).split();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_find_child() {
        let mut entries = BTreeMap::new();
        entries.insert(b"c".to_vec(), 10);
        entries.insert(b"f".to_vec(), 20);
        entries.insert(b"m".to_vec(), 30);
        let node = Node::Internal(entries);

        assert_eq!(node.find_child(b"a"), Some(10));
        assert_eq!(node.find_child(b"c"), Some(10));
        assert_eq!(node.find_child(b"e"), Some(10));
        assert_eq!(node.find_child(b"f"), Some(20));
        assert_eq!(node.find_child(b"z"), Some(30));
    }

    #[test]
    fn test_payload_layout() {
        let node = leaf([7]);
        let payload = node.encode().unwrap();
        assert_eq!(&payload[0..2], b"kv");
        assert_eq!(payload[2], CODEC_VERSION);
        assert_eq!(&payload[3..7], &1u32.to_be_bytes());

        let record = node.encode_record().unwrap();
        assert_eq!(&record[0..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(Node::decode(&record[4..]).unwrap(), node);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Node::decode(b"").is_err());
        assert!(Node::decode(b"zz\x01\0\0\0\0").is_err());

        let mut payload = leaf(0..3).encode().unwrap();
        payload.push(0);
        assert!(Node::decode(&payload).is_err());

        let payload = leaf(0..3).encode().unwrap();
        assert!(Node::decode(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn test_absorb_kind_mismatch() {
        let mut node = leaf(0..2);
        let err = node.absorb(Node::Internal(BTreeMap::new())).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corruption);

        node.absorb(leaf(5..7)).unwrap();
        assert_eq!(node.len(), 4);
    }
}
