//! Storage layer for the cowtree file format
//!
//! This module handles the low-level binary format of a store file:
//! - Value encoding
//! - Node records (leaf and internal)
//! - Root footers and footer recovery

pub mod value;
pub mod node;
pub mod footer;

pub use value::Value;
pub use node::{Node, NodeKind, NodePointer, NODE_SLOTS};
pub use footer::{Footer, MAGIC};
