use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use loam_types::{Key, ObjectHash};
use tracing::debug;

use crate::entry::RawEntry;
use crate::error::{PackError, PackResult};
use crate::index::{IndexEntry, PackIndex};
use crate::store::PackStore;

const PACK_MAGIC: &[u8; 4] = b"LMPK";
const PACK_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

/// On-disk pack store: an append-only `<base>.pack` file plus a `<base>.idx`
/// sidecar holding the fan-out index.
///
/// The index is rebuilt in memory on open and rewritten on flush/close. The
/// pack checksum is maintained incrementally while appending.
pub struct FilePackStore {
    pack_path: PathBuf,
    index_path: PathBuf,
    state: RwLock<FileState>,
}

struct FileState {
    file: File,
    len: u64,
    entries: HashMap<ObjectHash, (IndexEntry, u32)>,
    by_offset: HashMap<u64, ObjectHash>,
    hasher: blake3::Hasher,
    dirty: bool,
    closed: bool,
}

impl FilePackStore {
    /// Create a fresh pack at `<base>.pack` / `<base>.idx`.
    pub fn create(base: &Path) -> PackResult<Self> {
        let pack_path = base.with_extension("pack");
        let index_path = base.with_extension("idx");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&pack_path)?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(PACK_MAGIC);
        header.extend_from_slice(&PACK_VERSION.to_be_bytes());
        file.write_all(&header)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header);

        Ok(Self {
            pack_path,
            index_path,
            state: RwLock::new(FileState {
                file,
                len: HEADER_LEN,
                entries: HashMap::new(),
                by_offset: HashMap::new(),
                hasher,
                dirty: true,
                closed: false,
            }),
        })
    }

    /// Reopen an existing pack, recovering the index from the sidecar.
    pub fn open(base: &Path) -> PackResult<Self> {
        let pack_path = base.with_extension("pack");
        let index_path = base.with_extension("idx");

        let mut file = OpenOptions::new().read(true).write(true).open(&pack_path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(PackError::CorruptedEntry {
                offset: 0,
                field: "header".into(),
            });
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into(),
                actual: String::from_utf8_lossy(&header[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes"));
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut entries = HashMap::new();
        let mut by_offset = HashMap::new();
        if index_path.exists() {
            let index = PackIndex::from_bytes(&std::fs::read(&index_path)?)?;
            for i in 0..index.entry_count() {
                let entry = IndexEntry {
                    hash: index.hashes[i],
                    offset: index.offsets[i],
                    length: index.lengths[i],
                    kind: index.kinds[i],
                };
                entries.insert(entry.hash, (entry, index.crc32s[i]));
                by_offset.insert(entry.offset, entry.hash);
            }
        } else if len > HEADER_LEN {
            return Err(PackError::IndexCorrupted("index file missing".into()));
        }

        // Rebuild the incremental pack checksum over the existing bytes.
        let mut hasher = blake3::Hasher::new();
        hasher.update(&header);
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        hasher.update(&rest);

        debug!(
            pack = %pack_path.display(),
            entries = entries.len(),
            bytes = len,
            "opened pack"
        );

        Ok(Self {
            pack_path,
            index_path,
            state: RwLock::new(FileState {
                file,
                len,
                entries,
                by_offset,
                hasher,
                dirty: false,
                closed: false,
            }),
        })
    }

    /// Path of the pack file.
    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    /// Path of the index sidecar.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Number of indexed entries.
    pub fn entry_count(&self) -> usize {
        self.state.read().expect("lock poisoned").entries.len()
    }

    /// Current pack file length in bytes.
    pub fn pack_bytes(&self) -> u64 {
        self.state.read().expect("lock poisoned").len
    }

    fn locate(state: &FileState, key: &Key) -> Option<IndexEntry> {
        state.entries.get(&key.hash()).map(|(e, _)| *e)
    }

    fn write_index(state: &mut FileState, index_path: &Path) -> PackResult<()> {
        let checksum = *state.hasher.clone().finalize().as_bytes();
        let pairs: Vec<(IndexEntry, u32)> = state.entries.values().copied().collect();
        let index = PackIndex::build(pairs, checksum);
        std::fs::write(index_path, index.to_bytes())?;
        state.dirty = false;
        debug!(
            index = %index_path.display(),
            entries = index.entry_count(),
            "flushed pack index"
        );
        Ok(())
    }
}

impl PackStore for FilePackStore {
    fn mem(&self, key: &Key) -> PackResult<bool> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        Ok(Self::locate(&state, key).is_some())
    }

    fn find(&self, key: &Key) -> PackResult<Option<RawEntry>> {
        // Write lock: reads seek the shared file handle.
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        let entry = match Self::locate(&state, key) {
            Some(e) => e,
            None => return Ok(None),
        };
        let (_, expected_crc) = state.entries[&key.hash()];

        let mut buf = vec![0u8; entry.length as usize];
        state.file.seek(SeekFrom::Start(entry.offset))?;
        state.file.read_exact(&mut buf)?;

        let raw = RawEntry::decode_exact(&buf, entry.offset)?;
        if crc32fast::hash(&raw.payload) != expected_crc {
            return Err(PackError::CrcMismatch { hash: key.hash() });
        }
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
            .map(|(e, _)| Key::hinted(e.hash, e.offset, e.length)))
    }

    fn append(&self, hash: &ObjectHash, entry: &RawEntry) -> PackResult<Key> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        if let Some((existing, _)) = state.entries.get(hash) {
            return Ok(Key::hinted(existing.hash, existing.offset, existing.length));
        }

        let bytes = entry.encode()?;
        let offset = state.len;
        let length = bytes.len() as u32;

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&bytes)?;
        state.len += bytes.len() as u64;
        state.hasher.update(&bytes);

        let crc = crc32fast::hash(&entry.payload);
        state.entries.insert(
            *hash,
            (
                IndexEntry {
                    hash: *hash,
                    offset,
                    length,
                    kind: entry.kind,
                },
                crc,
            ),
        );
        state.by_offset.insert(offset, *hash);
        state.dirty = true;
        Ok(Key::hinted(*hash, offset, length))
    }

    fn key_at(&self, offset: u64) -> PackResult<Option<Key>> {
        let state = self.state.read().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        Ok(state.by_offset.get(&offset).map(|hash| {
            let (entry, _) = state.entries[hash];
            Key::hinted(entry.hash, entry.offset, entry.length)
        }))
    }

    fn batch(&self, f: &mut dyn FnMut(&dyn PackStore) -> PackResult<()>) -> PackResult<()> {
        f(self)?;
        self.flush()
    }

    fn flush(&self) -> PackResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Err(PackError::Closed);
        }
        state.file.flush()?;
        if state.dirty {
            Self::write_index(&mut state, &self.index_path)?;
        }
        Ok(())
    }

    fn close(&self) -> PackResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.closed {
            return Ok(());
        }
        state.file.flush()?;
        if state.dirty {
            Self::write_index(&mut state, &self.index_path)?;
        }
        state.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for FilePackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePackStore")
            .field("pack_path", &self.pack_path)
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
