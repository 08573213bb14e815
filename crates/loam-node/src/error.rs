use thiserror::Error;
use loam_types::ObjectHash;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("maximum tree depth exceeded at depth {0}")]
    MaxDepth(usize),

    #[error("add/remove called on a non-root inode")]
    WriteOnNonRoot,

    #[error("unknown hash at truncated boundary: {0}")]
    UnknownHashAtTruncatedBoundary(ObjectHash),

    #[error("dangling hash: {0} cannot be resolved")]
    DanglingHash(ObjectHash),

    #[error("key promotion hash mismatch: had {had}, got {got}")]
    KeyHashMismatch { had: ObjectHash, got: ObjectHash },

    #[error("entry at offset {offset} could not be decoded: bad {field}")]
    CorruptedEntry { offset: u64, field: String },

    #[error("hash-bits ordering requires at most {max} entries, got {entries}")]
    OrderingUnsupported { entries: usize, max: usize },

    #[error(transparent)]
    Pack(#[from] loam_pack::PackError),

    #[error(transparent)]
    Type(#[from] loam_types::TypeError),
}

pub type NodeResult<T> = Result<T, NodeError>;
