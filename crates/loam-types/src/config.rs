use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Largest branching factor the hash-bits ordering policy supports.
pub const MAX_HASH_BITS_ENTRIES: usize = 1024;

/// Structural configuration of an inode tree.
///
/// Both knobs are fixed for the lifetime of a store: changing either changes
/// the on-disk layout of every chunked tree (though not the hash of any
/// stable root).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Branching factor: maximum bindings in a leaf chunk and child slots in
    /// a tree node. A power of two.
    pub entries: usize,
    /// Roots with at most this many bindings hash as their flat map.
    /// At least `entries`.
    pub stable_hash: usize,
}

impl TreeConfig {
    /// Build a validated configuration.
    pub fn new(entries: usize, stable_hash: usize) -> Result<Self, TypeError> {
        if entries < 2 || !entries.is_power_of_two() {
            return Err(TypeError::InvalidEntries(entries));
        }
        if stable_hash < entries {
            return Err(TypeError::InvalidStableHash {
                stable_hash,
                entries,
            });
        }
        Ok(Self {
            entries,
            stable_hash,
        })
    }

    /// log2 of the branching factor: how many digest bits one level consumes.
    pub fn bits_per_level(&self) -> usize {
        self.entries.trailing_zeros() as usize
    }

    /// Maximum tree depth before a step is treated as pathological.
    pub fn max_depth(&self) -> usize {
        50 / self.bits_per_level()
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            entries: 32,
            stable_hash: 256,
        }
    }
}
