use thiserror::Error;
use loam_types::ObjectHash;

use crate::kind::EntryKind;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid pack magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("unknown entry kind byte: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("corrupted entry at offset {offset}: bad {field}")]
    CorruptedEntry { offset: u64, field: String },

    #[error("CRC32 mismatch for entry {hash}")]
    CrcMismatch { hash: ObjectHash },

    #[error("legacy kind {0} cannot be appended: the encoder only emits V2 entries")]
    LegacyAppend(EntryKind),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("pack store is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PackResult<T> = Result<T, PackError>;
