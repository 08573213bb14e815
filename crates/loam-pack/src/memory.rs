use std::collections::HashMap;
use std::sync::RwLock;

use loam_types::{Key, ObjectHash};

use crate::entry::RawEntry;
use crate::error::{PackError, PackResult};
use crate::index::IndexEntry;
use crate::store::PackStore;

/// In-memory pack store: an append-only byte log plus a hash index.
///
/// Intended for tests and embedding. The log and index live behind a
/// `RwLock` for safe concurrent access; entries are decoded fresh on every
/// read.
pub struct MemPackStore {
    state: RwLock<MemState>,
}

struct MemState {
    log: Vec<u8>,
    entries: HashMap<ObjectHash, IndexEntry>,
    by_offset: HashMap<u64, ObjectHash>,
    closed: bool,
}

impl MemPackStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemState {
                log: Vec::new(),
                entries: HashMap::new(),
                by_offset: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes in the append-only log.
    pub fn log_bytes(&self) -> u64 {
        self.state.read().expect("lock poisoned").log.len() as u64
    }

    /// All index entries, unordered.
    pub fn index_entries(&self) -> Vec<IndexEntry> {
        self.state
            .read()
            .expect("lock poisoned")
            .entries
            .values()
            .copied()
            .collect()
    }

    fn locate(state: &MemState, key: &Key) -> Option<IndexEntry> {
        match key.hint() {
            Some(hint) => state.entries.get(&key.hash()).copied().filter(|e| {
                e.offset == hint.offset && e.length == hint.length
            }),
            None => state.entries.get(&key.hash()).copied(),
        }
    }
}

impl Default for MemPackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PackStore for MemPackStore {
    fn mem(&self, key: &Key) -> PackResult<bool> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        Ok(Self::locate(&state, key).is_some())
    }

    fn find(&self, key: &Key) -> PackResult<Option<RawEntry>> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        let entry = match Self::locate(&state, key) {
            Some(e) => e,
            None => return Ok(None),
        };
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > state.log.len() {
            return Err(PackError::CorruptedEntry {
                offset: entry.offset,
                field: "extent".into(),
            });
        }
        let raw = RawEntry::decode_exact(&state.log[start..end], entry.offset)?;
        Ok(Some(raw))
    }

    fn index(&self, hash: &ObjectHash) -> PackResult<Option<Key>> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        Ok(state
            .entries
            .get(hash)
            .map(|e| Key::hinted(e.hash, e.offset, e.length)))
    }

    fn append(&self, hash: &ObjectHash, entry: &RawEntry) -> PackResult<Key> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        // Idempotent per hash: content-addressing guarantees identical bytes.
        if let Some(existing) = state.entries.get(hash) {
            return Ok(Key::hinted(existing.hash, existing.offset, existing.length));
        }
        let bytes = entry.encode()?;
        let offset = state.log.len() as u64;
        let length = bytes.len() as u32;
        state.log.extend_from_slice(&bytes);
        state.entries.insert(
            *hash,
            IndexEntry {
                hash: *hash,
                offset,
                length,
                kind: entry.kind,
            },
        );
        state.by_offset.insert(offset, *hash);
        Ok(Key::hinted(*hash, offset, length))
    }

    fn key_at(&self, offset: u64) -> PackResult<Option<Key>> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        Ok(state.by_offset.get(&offset).map(|hash| {
            let entry = state.entries[hash];
            Key::hinted(entry.hash, entry.offset, entry.length)
        }))
    }

    fn batch(&self, f: &mut dyn FnMut(&dyn PackStore) -> PackResult<()>) -> PackResult<()> {
        f(self)?;
        self.flush()
    }

    fn flush(&self) -> PackResult<()> {
        Ok(())
    }

    fn close(&self) -> PackResult<()> {
        self.state.write().expect("lock poisoned").closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for MemPackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPackStore")
            .field("entry_count", &self.len())
            .field("log_bytes", &self.log_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::EntryKind;
    use loam_types::ContentHasher;

    fn contents_entry(data: &[u8]) -> (ObjectHash, RawEntry) {
        (
            ContentHasher::CONTENTS.hash(data),
            RawEntry::new(EntryKind::Contents, data.to_vec()),
        )
    }

    #[test]
    fn append_then_find() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"hello world");
        let key = store.append(&hash, &entry).unwrap();
        assert!(key.hint().is_some());

        let found = store.find(&key).unwrap().expect("should exist");
        assert_eq!(found, entry);
    }

    #[test]
    fn find_by_unhinted_key_goes_through_index() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"indexed");
        store.append(&hash, &entry).unwrap();

        let found = store.find(&Key::unhinted(hash)).unwrap();
        assert_eq!(found, Some(entry));
    }

    #[test]
    fn find_missing_returns_none() {
        let store = MemPackStore::new();
        let missing = Key::unhinted(ObjectHash::from_bytes(b"missing"));
        assert!(store.find(&missing).unwrap().is_none());
        assert!(!store.mem(&missing).unwrap());
    }

    #[test]
    fn append_is_idempotent_per_hash() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"idempotent");
        let k1 = store.append(&hash, &entry).unwrap();
        let k2 = store.append(&hash, &entry).unwrap();
        assert_eq!(k1.hint(), k2.hint());
        assert_eq!(store.len(), 1);
        assert_eq!(store.log_bytes(), entry.encoded_len() as u64);
    }

    #[test]
    fn index_recovers_hinted_key() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"recover me");
        let appended = store.append(&hash, &entry).unwrap();

        let recovered = store.index(&hash).unwrap().expect("hash was appended");
        assert_eq!(recovered.hint(), appended.hint());
        assert!(store.index(&ObjectHash::from_bytes(b"never")).unwrap().is_none());
    }

    #[test]
    fn offsets_grow_monotonically() {
        let store = MemPackStore::new();
        let (h1, e1) = contents_entry(b"first");
        let (h2, e2) = contents_entry(b"second");
        let k1 = store.append(&h1, &e1).unwrap();
        let k2 = store.append(&h2, &e2).unwrap();
        assert_eq!(k1.offset(), Some(0));
        assert_eq!(k2.offset(), Some(e1.encoded_len() as u64));
    }

    #[test]
    fn batch_runs_closure() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"batched");
        store
            .batch(&mut |s| {
                s.append(&hash, &entry)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn closed_store_refuses_operations() {
        let store = MemPackStore::new();
        let (hash, entry) = contents_entry(b"late");
        store.close().unwrap();
        assert!(matches!(store.append(&hash, &entry), Err(PackError::Closed)));
        assert!(matches!(
            store.find(&Key::unhinted(hash)),
            Err(PackError::Closed)
        ));
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemPackStore::new());
        let (hash, entry) = contents_entry(b"shared data");
        let key = store.append(&hash, &entry).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let expected = entry.clone();
                thread::spawn(move || {
                    let found = store.find(&key).unwrap().unwrap();
                    assert_eq!(found, expected);
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }
}
