use std::sync::Arc;

use loam_types::config::MAX_HASH_BITS_ENTRIES;
use loam_types::{ContentHasher, Step, TreeConfig};
use xxhash_rust::xxh64::xxh64;

use crate::error::{NodeError, NodeResult};

/// Policy assigning each `(step, depth)` pair to a child slot.
///
/// The policy is fixed per store: it shapes the chunking of large trees (and
/// therefore the on-disk layout) but never the hash of a stable root.
#[derive(Clone)]
pub enum StepOrdering {
    /// Window over the step digest: `log2(entries)` bits starting at bit
    /// `depth * log2(entries)`. Only valid while the window stays inside the
    /// 256-bit digest, and only for `entries <= 1024`.
    HashBits,
    /// Seeded xxh64 of the step's binary form, reduced modulo `entries`.
    Seeded,
    /// Caller-supplied pure function, reduced modulo `entries`.
    Custom(Arc<dyn Fn(&Step, usize) -> usize + Send + Sync>),
}

impl StepOrdering {
    /// Validate the policy against a configuration.
    pub fn validate(&self, conf: &TreeConfig) -> NodeResult<()> {
        if matches!(self, Self::HashBits) && conf.entries > MAX_HASH_BITS_ENTRIES {
            return Err(NodeError::OrderingUnsupported {
                entries: conf.entries,
                max: MAX_HASH_BITS_ENTRIES,
            });
        }
        Ok(())
    }

    /// The child slot for `step` at `depth`, in `[0, entries)`.
    pub fn bucket(&self, conf: &TreeConfig, step: &Step, depth: usize) -> NodeResult<usize> {
        match self {
            Self::HashBits => {
                let digest = ContentHasher::raw_hash(step.as_bytes());
                let bits = conf.bits_per_level();
                let start = depth * bits;
                if start + bits > digest.len() * 8 {
                    return Err(NodeError::MaxDepth(depth));
                }
                Ok(extract_bits(&digest, start, bits))
            }
            Self::Seeded => {
                let h = xxh64(step.as_bytes(), depth as u64);
                Ok((h % conf.entries as u64) as usize)
            }
            Self::Custom(f) => Ok(f(step, depth) % conf.entries),
        }
    }
}

impl std::fmt::Debug for StepOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashBits => f.write_str("HashBits"),
            Self::Seeded => f.write_str("Seeded"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Read `count` bits from `digest` starting at bit `start` (MSB-first),
/// straddling byte boundaries as needed.
fn extract_bits(digest: &[u8], start: usize, count: usize) -> usize {
    let mut value = 0usize;
    for k in 0..count {
        let bit = start + k;
        let byte = digest[bit / 8];
        let b = (byte >> (7 - (bit % 8))) & 1;
        value = (value << 1) | b as usize;
    }
    value
}
