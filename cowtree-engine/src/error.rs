//! Error handling for the cowtree engine
//!
//! Every failure maps onto one of four classes: I/O, corruption, a missing
//! root, or a refused lock. Absent keys are not errors.

use thiserror::Error;

/// Coarse classification of a [`TreeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Seek, read, write, flush or rename failed
    Io,
    /// Bad length prefix, undecodable payload or broken tree structure
    Corruption,
    /// No usable footer anywhere in the file
    NotFound,
    /// Exclusive lock could not be obtained
    Lock,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Io => "I/O error",
            ErrorKind::Corruption => "corruption",
            ErrorKind::NotFound => "not found",
            ErrorKind::Lock => "lock error",
        })
    }
}

/// Main error type for the cowtree engine
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("No root footer found in store")]
    RootNotFound,

    #[error("Store is locked by another writer")]
    Locked,
}

impl TreeError {
    /// Get the error class for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::Io(_) => ErrorKind::Io,
            TreeError::Corrupt(_) => ErrorKind::Corruption,
            TreeError::RootNotFound => ErrorKind::NotFound,
            TreeError::Locked => ErrorKind::Lock,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        TreeError::Corrupt(msg.into())
    }
}

/// Result type for cowtree operations
pub type TreeResult<T> = Result<T, TreeError>;
