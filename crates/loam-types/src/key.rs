use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;

/// Location hint for an entry inside the pack file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackHint {
    /// Byte offset of the entry's kind byte in the pack file.
    pub offset: u64,
    /// Total framed length of the entry in bytes.
    pub length: u32,
}

/// Reference to a stored entry: a content hash, optionally with a pack hint.
///
/// A key with a hint points straight at the entry's bytes; a key without one
/// must go through the index. Hints are advisory: two keys for the same entry
/// compare equal whether or not they carry one, and a key never loses its
/// hint once acquired.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Key {
    hash: ObjectHash,
    hint: Option<PackHint>,
}

impl Key {
    /// A key with no pack location, only the content hash.
    pub fn unhinted(hash: ObjectHash) -> Self {
        Self { hash, hint: None }
    }

    /// A key carrying the entry's `(offset, length)` in the pack file.
    pub fn hinted(hash: ObjectHash, offset: u64, length: u32) -> Self {
        Self {
            hash,
            hint: Some(PackHint { offset, length }),
        }
    }

    /// The content hash this key projects to.
    pub fn hash(&self) -> ObjectHash {
        self.hash
    }

    /// The pack location hint, if any.
    pub fn hint(&self) -> Option<PackHint> {
        self.hint
    }

    /// The pack offset, if this key is hinted.
    pub fn offset(&self) -> Option<u64> {
        self.hint.map(|h| h.offset)
    }
}

// Keys compare by hash only: the hint is a location detail, not identity.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hint {
            Some(h) => write!(f, "{}@{}+{}", self.hash.short_hex(), h.offset, h.length),
            None => write!(f, "{}", self.hash.short_hex()),
        }
    }
}

impl From<ObjectHash> for Key {
    fn from(hash: ObjectHash) -> Self {
        Self::unhinted(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hinted_and_unhinted_compare_equal() {
        let h = ObjectHash::from_bytes(b"entry");
        let plain = Key::unhinted(h);
        let hinted = Key::hinted(h, 1024, 64);
        assert_eq!(plain, hinted);
    }

    #[test]
    fn hash_projection_is_total() {
        let h = ObjectHash::from_bytes(b"entry");
        assert_eq!(Key::unhinted(h).hash(), h);
        assert_eq!(Key::hinted(h, 0, 1).hash(), h);
    }

    #[test]
    fn hint_accessors() {
        let h = ObjectHash::from_bytes(b"entry");
        let k = Key::hinted(h, 512, 33);
        assert_eq!(k.hint(), Some(PackHint { offset: 512, length: 33 }));
        assert_eq!(k.offset(), Some(512));
        assert_eq!(Key::unhinted(h).offset(), None);
    }

    #[test]
    fn ordering_follows_hash() {
        let k1 = Key::unhinted(ObjectHash::from_digest([0; 32]));
        let k2 = Key::hinted(ObjectHash::from_digest([1; 32]), 0, 0);
        assert!(k1 < k2);
    }

    #[test]
    fn display_shows_hint() {
        let h = ObjectHash::from_bytes(b"entry");
        let k = Key::hinted(h, 7, 3);
        assert!(format!("{k}").contains("@7+3"));
        assert!(!format!("{}", Key::unhinted(h)).contains('@'));
    }
}
