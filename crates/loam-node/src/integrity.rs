use thiserror::Error;

use loam_types::{ObjectHash, TreeConfig};

use crate::bin::{Bin, BinV};

/// Structured findings from integrity checks, rendered by tooling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("wrong hash: expected {expected}, got {got}")]
    WrongHash {
        expected: ObjectHash,
        got: ObjectHash,
    },

    #[error("absent value: {hash} is not reachable")]
    AbsentValue { hash: ObjectHash },

    #[error("invalid depth: expected {expected}, got {got}")]
    InvalidDepth { expected: usize, got: usize },

    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: u64, got: u64 },

    #[error("duplicated entries")]
    DuplicatedEntries,

    #[error("unsorted entries")]
    UnsortedEntries,

    #[error("duplicated pointers")]
    DuplicatedPointers,

    #[error("unsorted pointers")]
    UnsortedPointers,

    #[error("empty inode")]
    Empty,
}

/// Shape-level checks on a single decoded chunk.
pub fn check_bin(bin: &Bin, conf: &TreeConfig) -> Result<(), IntegrityError> {
    match &bin.v {
        BinV::Values(bindings) => {
            if bindings.is_empty() && !bin.root {
                return Err(IntegrityError::Empty);
            }
            if bindings.len() > conf.entries {
                return Err(IntegrityError::InvalidLength {
                    expected: conf.entries as u64,
                    got: bindings.len() as u64,
                });
            }
            for pair in bindings.windows(2) {
                match pair[0].0.cmp(&pair[1].0) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => return Err(IntegrityError::DuplicatedEntries),
                    std::cmp::Ordering::Greater => return Err(IntegrityError::UnsortedEntries),
                }
            }
            Ok(())
        }
        BinV::Tree {
            depth,
            length,
            ptrs,
        } => {
            if ptrs.is_empty() {
                return Err(IntegrityError::Empty);
            }
            if *depth >= conf.max_depth() {
                return Err(IntegrityError::InvalidDepth {
                    expected: conf.max_depth() - 1,
                    got: *depth,
                });
            }
            if *length <= conf.entries as u64 {
                return Err(IntegrityError::InvalidLength {
                    expected: conf.entries as u64 + 1,
                    got: *length,
                });
            }
            for pair in ptrs.windows(2) {
                match pair[0].0.cmp(&pair[1].0) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => return Err(IntegrityError::DuplicatedPointers),
                    std::cmp::Ordering::Greater => return Err(IntegrityError::UnsortedPointers),
                }
            }
            if let Some((slot, _)) = ptrs.last() {
                if *slot >= conf.entries {
                    return Err(IntegrityError::InvalidLength {
                        expected: conf.entries as u64 - 1,
                        got: *slot as u64,
                    });
                }
            }
            Ok(())
        }
    }
}
