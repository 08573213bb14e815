use std::fmt;

use loam_types::ObjectHash;

use crate::error::{PackError, PackResult};
use crate::kind::EntryKind;

/// One indexed pack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: ObjectHash,
    pub offset: u64,
    pub length: u32,
    pub kind: EntryKind,
}

impl fmt::Display for IndexEntry {
    // One line per entry, the `ppidx` textual form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} off={} len={} kind={}",
            self.hash, self.offset, self.length, self.kind
        )
    }
}

/// Pack index for fast hash-to-offset lookups.
///
/// Layout mirrors git's pack index v2:
/// - Fan-out table: 256 entries counting hashes with first byte <= index
/// - Sorted hash array
/// - CRC32 array (parallel, over each entry's payload)
/// - Offset / length / kind arrays (parallel)
/// - Pack checksum
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub fan_out: [u32; 256],
    pub hashes: Vec<ObjectHash>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub lengths: Vec<u32>,
    pub kinds: Vec<EntryKind>,
    pub pack_checksum: [u8; 32],
}

const INDEX_MAGIC: &[u8; 4] = b"LMIX";
const INDEX_VERSION: u32 = 1;

impl PackIndex {
    /// Build an index from `(entry, crc32)` pairs and a pack checksum.
    pub fn build(mut entries: Vec<(IndexEntry, u32)>, pack_checksum: [u8; 32]) -> Self {
        entries.sort_by(|a, b| a.0.hash.cmp(&b.0.hash));

        let mut fan_out = [0u32; 256];
        let mut hashes = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());
        let mut lengths = Vec::with_capacity(entries.len());
        let mut kinds = Vec::with_capacity(entries.len());

        for (entry, crc) in &entries {
            hashes.push(entry.hash);
            crc32s.push(*crc);
            offsets.push(entry.offset);
            lengths.push(entry.length);
            kinds.push(entry.kind);
        }

        // fan_out[i] = count of hashes with first byte <= i
        for (i, hash) in hashes.iter().enumerate() {
            let first_byte = hash.as_bytes()[0] as usize;
            for slot in first_byte..256 {
                fan_out[slot] = (i + 1) as u32;
            }
        }

        Self {
            fan_out,
            hashes,
            crc32s,
            offsets,
            lengths,
            kinds,
            pack_checksum,
        }
    }

    /// Look up an entry and its CRC32 by hash.
    pub fn lookup(&self, hash: &ObjectHash) -> Option<(IndexEntry, u32)> {
        let first_byte = hash.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = &self.hashes[start..end];
        match range.binary_search_by(|probe| probe.cmp(hash)) {
            Ok(pos) => {
                let idx = start + pos;
                Some((
                    IndexEntry {
                        hash: *hash,
                        offset: self.offsets[idx],
                        length: self.lengths[idx],
                        kind: self.kinds[idx],
                    },
                    self.crc32s[idx],
                ))
            }
            Err(_) => None,
        }
    }

    /// Total entry count.
    pub fn entry_count(&self) -> usize {
        self.hashes.len()
    }

    /// Check if a hash is indexed.
    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.lookup(hash).is_some()
    }

    /// Iterate over all entries in hash order.
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.hashes.len()).map(|i| IndexEntry {
            hash: self.hashes[i],
            offset: self.offsets[i],
            length: self.lengths[i],
            kind: self.kinds[i],
        })
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for hash in &self.hashes {
            buf.extend_from_slice(hash.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        for &offset in &self.offsets {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        for &length in &self.lengths {
            buf.extend_from_slice(&length.to_be_bytes());
        }
        for kind in &self.kinds {
            buf.push(kind.to_byte());
        }
        buf.extend_from_slice(&self.pack_checksum);
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 8 {
            return Err(PackError::IndexCorrupted("too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut pos = 8;
        if data.len() < pos + 256 * 4 {
            return Err(PackError::IndexCorrupted("fan-out truncated".into()));
        }
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes"));
            pos += 4;
        }

        let count = fan_out[255] as usize;
        let needed = pos + count * (32 + 4 + 8 + 4 + 1) + 32;
        if data.len() < needed {
            return Err(PackError::IndexCorrupted("data truncated".into()));
        }

        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&data[pos..pos + 32]);
            hashes.push(ObjectHash::from_digest(digest));
            pos += 32;
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes")));
            pos += 4;
        }

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(u64::from_be_bytes(data[pos..pos + 8].try_into().expect("8 bytes")));
            pos += 8;
        }

        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            lengths.push(u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes")));
            pos += 4;
        }

        let mut kinds = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = EntryKind::from_byte(data[pos])
                .map_err(|_| PackError::IndexCorrupted(format!("bad kind byte 0x{:02x}", data[pos])))?;
            kinds.push(kind);
            pos += 1;
        }

        let mut pack_checksum = [0u8; 32];
        pack_checksum.copy_from_slice(&data[pos..pos + 32]);

        Ok(Self {
            fan_out,
            hashes,
            crc32s,
            offsets,
            lengths,
            kinds,
            pack_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes(n: usize) -> Vec<ObjectHash> {
        (0..n)
            .map(|i| {
                let mut digest = [0u8; 32];
                digest[0] = (i % 256) as u8;
                digest[1] = (i / 256) as u8;
                ObjectHash::from_digest(digest)
            })
            .collect()
    }

    fn make_entries(n: usize) -> Vec<(IndexEntry, u32)> {
        make_hashes(n)
            .into_iter()
            .enumerate()
            .map(|(i, hash)| {
                (
                    IndexEntry {
                        hash,
                        offset: (i * 100) as u64,
                        length: (i * 7 + 1) as u32,
                        kind: EntryKind::InodeV2Root,
                    },
                    (i * 13) as u32,
                )
            })
            .collect()
    }

    #[test]
    fn build_empty_index() {
        let idx = PackIndex::build(vec![], [0u8; 32]);
        assert_eq!(idx.entry_count(), 0);
        assert!(idx.fan_out.iter().all(|&c| c == 0));
    }

    #[test]
    fn build_and_lookup_single() {
        let hash = ObjectHash::from_bytes(b"hello world test data");
        let entry = IndexEntry {
            hash,
            offset: 100,
            length: 42,
            kind: EntryKind::Contents,
        };
        let idx = PackIndex::build(vec![(entry, 7)], [0u8; 32]);
        assert_eq!(idx.entry_count(), 1);
        let (found, crc) = idx.lookup(&hash).unwrap();
        assert_eq!(found, entry);
        assert_eq!(crc, 7);
    }

    #[test]
    fn lookup_missing_returns_none() {
        let idx = PackIndex::build(make_entries(3), [0u8; 32]);
        assert!(idx.lookup(&ObjectHash::from_bytes(b"missing")).is_none());
    }

    #[test]
    fn build_and_lookup_multiple() {
        let entries = make_entries(10);
        let idx = PackIndex::build(entries.clone(), [0u8; 32]);
        assert_eq!(idx.entry_count(), 10);
        for (entry, _) in &entries {
            assert!(idx.contains(&entry.hash));
        }
    }

    #[test]
    fn entries_iterate_in_hash_order() {
        let idx = PackIndex::build(make_entries(20), [0u8; 32]);
        let listed: Vec<_> = idx.entries().collect();
        assert_eq!(listed.len(), 20);
        for w in listed.windows(2) {
            assert!(w[0].hash < w[1].hash);
        }
    }

    #[test]
    fn serialization_roundtrip() {
        let entries = make_entries(5);
        let checksum = [0xAB; 32];
        let idx = PackIndex::build(entries.clone(), checksum);

        let bytes = idx.to_bytes();
        let idx2 = PackIndex::from_bytes(&bytes).unwrap();

        assert_eq!(idx2.entry_count(), idx.entry_count());
        assert_eq!(idx2.pack_checksum, checksum);
        for (entry, _) in &entries {
            assert_eq!(idx.lookup(&entry.hash), idx2.lookup(&entry.hash));
        }
    }

    #[test]
    fn from_bytes_bad_magic() {
        let err = PackIndex::from_bytes(b"BADMxxxxxxxx").unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }

    #[test]
    fn from_bytes_bad_version() {
        let mut data = Vec::new();
        data.extend_from_slice(INDEX_MAGIC);
        data.extend_from_slice(&99u32.to_be_bytes());
        let err = PackIndex::from_bytes(&data).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedVersion(99)));
    }

    #[test]
    fn from_bytes_truncated() {
        let err = PackIndex::from_bytes(b"LMIX").unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));
    }

    #[test]
    fn display_is_one_line() {
        let entry = IndexEntry {
            hash: ObjectHash::from_bytes(b"entry"),
            offset: 12,
            length: 34,
            kind: EntryKind::InodeV2NonRoot,
        };
        let line = format!("{entry}");
        assert!(line.contains("off=12"));
        assert!(line.contains("len=34"));
        assert!(line.contains("kind=inode-v2-nonroot"));
        assert!(!line.contains('\n'));
    }
}
