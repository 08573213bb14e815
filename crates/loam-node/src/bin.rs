use loam_pack::{encode_varint, EntryKind};
use loam_types::{ContentHasher, Key, ObjectHash, Step, Value};

/// Reference to a child inode inside a bin form.
///
/// Before a save the child may only be known by hash; after a save every
/// pointer is a key. Hashing always goes through [`PtrRef::hash`], so the
/// two forms hash identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtrRef {
    Hash(ObjectHash),
    Key(Key),
}

impl PtrRef {
    pub fn hash(&self) -> ObjectHash {
        match self {
            Self::Hash(h) => *h,
            Self::Key(k) => k.hash(),
        }
    }

    pub fn key(&self) -> Option<Key> {
        match self {
            Self::Hash(_) => None,
            Self::Key(k) => Some(*k),
        }
    }
}

/// The wire shape of one inode chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BinV {
    /// Leaf chunk: bindings sorted by step.
    Values(Vec<(Step, Value)>),
    /// Interior chunk: child pointers sorted by slot.
    Tree {
        depth: usize,
        length: u64,
        ptrs: Vec<(usize, PtrRef)>,
    },
}

/// One inode chunk as serialised: the shape plus its rootness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bin {
    pub root: bool,
    pub v: BinV,
}

impl Bin {
    pub fn values(root: bool, mut bindings: Vec<(Step, Value)>) -> Self {
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            root,
            v: BinV::Values(bindings),
        }
    }

    pub fn tree(root: bool, depth: usize, length: u64, mut ptrs: Vec<(usize, PtrRef)>) -> Self {
        ptrs.sort_by_key(|(slot, _)| *slot);
        Self {
            root,
            v: BinV::Tree {
                depth,
                length,
                ptrs,
            },
        }
    }

    /// The pack kind this chunk persists as. The encoder only emits V2.
    pub fn kind(&self) -> EntryKind {
        if self.root {
            EntryKind::InodeV2Root
        } else {
            EntryKind::InodeV2NonRoot
        }
    }

    /// Total bindings transitively reachable from this chunk.
    pub fn length(&self) -> u64 {
        match &self.v {
            BinV::Values(bindings) => bindings.len() as u64,
            BinV::Tree { length, .. } => *length,
        }
    }

    /// Structural hash: the hash of this chunk's canonical encoding, with
    /// every child pointer contributing its own hash. Key hints never leak
    /// into the digest.
    pub fn structural_hash(&self) -> ObjectHash {
        let mut buf = Vec::new();
        match &self.v {
            BinV::Values(bindings) => {
                buf.push(0);
                encode_bindings(&mut buf, bindings);
            }
            BinV::Tree {
                depth,
                length,
                ptrs,
            } => {
                buf.push(1);
                encode_varint(&mut buf, *depth as u64);
                encode_varint(&mut buf, *length);
                encode_varint(&mut buf, ptrs.len() as u64);
                for (slot, ptr) in ptrs {
                    encode_varint(&mut buf, *slot as u64);
                    buf.extend_from_slice(ptr.hash().as_bytes());
                }
            }
        }
        ContentHasher::INODE.hash(&buf)
    }
}

/// Hash of the flat node a binding set represents: the hash a chunking-free
/// implementation would compute. Stable roots hash this way.
pub fn flat_hash(bindings: &[(Step, Value)]) -> ObjectHash {
    let mut sorted: Vec<&(Step, Value)> = bindings.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();
    encode_varint(&mut buf, sorted.len() as u64);
    for (step, value) in sorted {
        encode_binding(&mut buf, step, value);
    }
    ContentHasher::NODE.hash(&buf)
}

fn encode_bindings(buf: &mut Vec<u8>, bindings: &[(Step, Value)]) {
    encode_varint(buf, bindings.len() as u64);
    for (step, value) in bindings {
        encode_binding(buf, step, value);
    }
}

fn encode_binding(buf: &mut Vec<u8>, step: &Step, value: &Value) {
    encode_varint(buf, step.byte_len() as u64);
    buf.extend_from_slice(step.as_bytes());
    match value {
        Value::Contents { key, metadata } => {
            buf.push(0);
            buf.extend_from_slice(key.hash().as_bytes());
            buf.push(metadata.to_byte());
        }
        Value::Node { key } => {
            buf.push(1);
            buf.extend_from_slice(key.hash().as_bytes());
        }
    }
}
