//! Stored values and their binary encoding
//!
//! Leaf nodes map keys to a closed set of value shapes. Each value is written
//! as a one-byte tag followed by its body; all integers are big-endian.
//!
//! ```text
//! 0x00                                  null
//! 0x01 b:u8                             bool
//! 0x02 i:i64                            integer
//! 0x03 bits:u64                         float (IEEE-754 bits)
//! 0x04 len:u32 utf8                     string
//! 0x05 n:u32 value*n                    list
//! 0x06 n:u32 (len:u32 utf8 value)*n     map, keys ascending
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// Deepest list/map nesting accepted when decoding
pub const MAX_DEPTH: usize = 64;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_MAP: u8 = 0x06;

/// A value stored under a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Write this value in its binary form
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.write_nested(w, 0)
    }

    fn write_nested<W: Write>(&self, w: &mut W, depth: usize) -> io::Result<()> {
        if depth > MAX_DEPTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "value nested too deeply",
            ));
        }

        match self {
            Value::Null => w.write_u8(TAG_NULL),
            Value::Bool(b) => {
                w.write_u8(TAG_BOOL)?;
                w.write_u8(*b as u8)
            }
            Value::Int(i) => {
                w.write_u8(TAG_INT)?;
                w.write_i64::<BigEndian>(*i)
            }
            Value::Float(f) => {
                w.write_u8(TAG_FLOAT)?;
                w.write_u64::<BigEndian>(f.to_bits())
            }
            Value::String(s) => {
                w.write_u8(TAG_STRING)?;
                write_bytes(w, s.as_bytes())
            }
            Value::List(items) => {
                w.write_u8(TAG_LIST)?;
                w.write_u32::<BigEndian>(len_u32(items.len())?)?;
                for item in items {
                    item.write_nested(w, depth + 1)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                w.write_u8(TAG_MAP)?;
                w.write_u32::<BigEndian>(len_u32(map.len())?)?;
                for (k, v) in map {
                    write_bytes(w, k.as_bytes())?;
                    v.write_nested(w, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Read a value written by [`Value::write_to`]
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Self::read_nested(r, 0)
    }

    fn read_nested<R: Read>(r: &mut R, depth: usize) -> io::Result<Self> {
        if depth > MAX_DEPTH {
            return Err(invalid("value nested too deeply"));
        }

        match r.read_u8()? {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => match r.read_u8()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(invalid(format!("invalid bool byte {:#04x}", other))),
            },
            TAG_INT => Ok(Value::Int(r.read_i64::<BigEndian>()?)),
            TAG_FLOAT => Ok(Value::Float(f64::from_bits(r.read_u64::<BigEndian>()?))),
            TAG_STRING => Ok(Value::String(read_string(r)?)),
            TAG_LIST => {
                let count = r.read_u32::<BigEndian>()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(Self::read_nested(r, depth + 1)?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let count = r.read_u32::<BigEndian>()?;
                let mut map = BTreeMap::new();
                let mut last: Option<String> = None;
                for _ in 0..count {
                    let key = read_string(r)?;
                    if last.as_ref().is_some_and(|prev| *prev >= key) {
                        return Err(invalid("map keys out of order"));
                    }
                    let value = Self::read_nested(r, depth + 1)?;
                    last = Some(key.clone());
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            tag => Err(invalid(format!("unknown value tag {:#04x}", tag))),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// Convert a length to its on-disk u32 form
pub(crate) fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "length exceeds u32 range")
    })
}

/// Write a u32 length prefix followed by the bytes
pub(crate) fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<BigEndian>(len_u32(bytes.len())?)?;
    w.write_all(bytes)
}

/// Read a u32 length prefix and exactly that many bytes
pub(crate) fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()? as u64;
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "byte string truncated",
        ));
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    String::from_utf8(read_bytes(r)?).map_err(|_| invalid("string is not UTF-8"))
}

pub(crate) fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
