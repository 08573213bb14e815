use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("empty step")]
    EmptyStep,

    #[error("invalid branching factor {0}: must be a power of two >= 2")]
    InvalidEntries(usize),

    #[error("stability threshold {stable_hash} is below the branching factor {entries}")]
    InvalidStableHash { stable_hash: usize, entries: usize },
}
