//! Tree operations
//!
//! Each operation works on a [`NodeStore`](crate::file_manager::NodeStore);
//! locking and handle refresh are the caller's job (see [`crate::Store`]).

pub mod lookup;
pub mod mutation;
pub mod range;
pub mod leaves;
pub mod compact;

pub use compact::CompactionReport;
