use std::sync::Arc;

use loam_pack::{Dict, EntryKind, PackStore, RawEntry};
use loam_types::{ContentHasher, Key, ObjectHash};

use crate::bin::Bin;
use crate::compress::{self, DecodeCtx};
use crate::error::{NodeError, NodeResult};

/// The store surface the inode layer consumes: bin-level find/mem/index/
/// append. Implementations own the codec details.
pub trait NodeStore: Send + Sync {
    /// Whether the entry behind `key` is present.
    fn mem(&self, key: &Key) -> NodeResult<bool>;

    /// Load and decode the inode chunk behind `key`.
    fn find_node(&self, key: &Key) -> NodeResult<Option<Bin>>;

    /// Recover a key from a hash previously appended.
    fn index(&self, hash: &ObjectHash) -> NodeResult<Option<Key>>;

    /// Encode and append an inode chunk under `hash`, returning its key.
    fn append_node(&self, hash: &ObjectHash, bin: &Bin) -> NodeResult<Key>;
}

/// Glue between inode values and an append-only pack: runs the compress
/// codec over a [`PackStore`] with a shared dictionary.
pub struct PackNodeStore {
    store: Arc<dyn PackStore>,
    dict: Arc<Dict>,
}

impl PackNodeStore {
    pub fn new(store: Arc<dyn PackStore>, dict: Arc<Dict>) -> Self {
        Self { store, dict }
    }

    /// The underlying pack store.
    pub fn pack(&self) -> &Arc<dyn PackStore> {
        &self.store
    }

    /// The shared dictionary.
    pub fn dict(&self) -> &Arc<Dict> {
        &self.dict
    }

    /// Append a contents entry; the hash doubles as its checksum.
    pub fn append_contents(&self, data: &[u8]) -> NodeResult<Key> {
        let hash = ContentHasher::CONTENTS.hash(data);
        let entry = RawEntry::new(EntryKind::Contents, data.to_vec());
        Ok(self.store.append(&hash, &entry)?)
    }

    /// Read a contents entry back, verifying its hash.
    pub fn find_contents(&self, key: &Key) -> NodeResult<Option<Vec<u8>>> {
        let entry = match self.store.find(key)? {
            Some(e) => e,
            None => return Ok(None),
        };
        if entry.kind != EntryKind::Contents {
            return Err(NodeError::CorruptedEntry {
                offset: key.offset().unwrap_or(0),
                field: "kind".into(),
            });
        }
        if !ContentHasher::CONTENTS.verify(&entry.payload, &key.hash()) {
            return Err(NodeError::CorruptedEntry {
                offset: key.offset().unwrap_or(0),
                field: "contents checksum".into(),
            });
        }
        Ok(Some(entry.payload))
    }
}

impl DecodeCtx for PackNodeStore {
    fn dict_resolve(&self, id: u16) -> Option<String> {
        self.dict.resolve(id)
    }

    fn key_of_offset(&self, offset: u64) -> NodeResult<Option<Key>> {
        Ok(self.store.key_at(offset)?)
    }
}

impl NodeStore for PackNodeStore {
    fn mem(&self, key: &Key) -> NodeResult<bool> {
        Ok(self.store.mem(key)?)
    }

    fn find_node(&self, key: &Key) -> NodeResult<Option<Bin>> {
        let entry = match self.store.find(key)? {
            Some(e) => e,
            None => return Ok(None),
        };
        let offset = key.offset().unwrap_or(0);
        if !entry.kind.is_inode() {
            return Err(NodeError::CorruptedEntry {
                offset,
                field: "kind".into(),
            });
        }
        let bin = compress::decode(&entry.payload, entry.kind, self, offset)?;
        Ok(Some(bin))
    }

    fn index(&self, hash: &ObjectHash) -> NodeResult<Option<Key>> {
        Ok(self.store.index(hash)?)
    }

    fn append_node(&self, hash: &ObjectHash, bin: &Bin) -> NodeResult<Key> {
        let payload = compress::encode(bin, &self.dict);
        let entry = RawEntry::new(bin.kind(), payload);
        Ok(self.store.append(hash, &entry)?)
    }
}

impl std::fmt::Debug for PackNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackNodeStore")
            .field("dict", &self.dict)
            .finish()
    }
}
