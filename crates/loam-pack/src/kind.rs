use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, PackResult};

/// Kind tag for persisted pack entries.
///
/// The byte is the first byte of every framed entry. V1 inode and commit
/// kinds survive from older packs and carry no length header, so a scan must
/// size-probe their payloads; V2 kinds put an explicit length right after the
/// kind byte and can be skipped in O(1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Raw contents entry.
    Contents,
    /// Legacy commit without a length header.
    CommitV1,
    /// Commit with a length header.
    CommitV2,
    /// Legacy inode, hashed as its flat map.
    InodeV1Stable,
    /// Legacy inode, hashed structurally.
    InodeV1Unstable,
    /// Inode chunk that is the root of its tree.
    InodeV2Root,
    /// Inode chunk below the root.
    InodeV2NonRoot,
}

impl EntryKind {
    /// Serialize to the tag byte used in the pack file.
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Contents => b'B',
            Self::CommitV1 => b'C',
            Self::CommitV2 => b'D',
            Self::InodeV1Unstable => b'I',
            Self::InodeV1Stable => b'N',
            Self::InodeV2Root => b'R',
            Self::InodeV2NonRoot => b'O',
        }
    }

    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> PackResult<Self> {
        match byte {
            b'B' => Ok(Self::Contents),
            b'C' => Ok(Self::CommitV1),
            b'D' => Ok(Self::CommitV2),
            b'I' => Ok(Self::InodeV1Unstable),
            b'N' => Ok(Self::InodeV1Stable),
            b'R' => Ok(Self::InodeV2Root),
            b'O' => Ok(Self::InodeV2NonRoot),
            other => Err(PackError::UnknownKind(other)),
        }
    }

    /// Whether a 4-byte payload length follows the kind byte.
    pub fn has_length_header(&self) -> bool {
        match self {
            Self::Contents | Self::CommitV2 | Self::InodeV2Root | Self::InodeV2NonRoot => true,
            Self::CommitV1 | Self::InodeV1Stable | Self::InodeV1Unstable => false,
        }
    }

    /// Whether this kind holds an inode payload.
    pub fn is_inode(&self) -> bool {
        matches!(
            self,
            Self::InodeV1Stable | Self::InodeV1Unstable | Self::InodeV2Root | Self::InodeV2NonRoot
        )
    }

    /// All kinds, in tag-byte order.
    pub fn all() -> [Self; 7] {
        [
            Self::Contents,
            Self::CommitV1,
            Self::CommitV2,
            Self::InodeV1Unstable,
            Self::InodeV1Stable,
            Self::InodeV2Root,
            Self::InodeV2NonRoot,
        ]
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contents => "contents",
            Self::CommitV1 => "commit-v1",
            Self::CommitV2 => "commit-v2",
            Self::InodeV1Stable => "inode-v1-stable",
            Self::InodeV1Unstable => "inode-v1-unstable",
            Self::InodeV2Root => "inode-v2-root",
            Self::InodeV2NonRoot => "inode-v2-nonroot",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip_all_kinds() {
        for kind in EntryKind::all() {
            assert_eq!(EntryKind::from_byte(kind.to_byte()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_byte_is_an_error() {
        let err = EntryKind::from_byte(b'Z').unwrap_err();
        assert!(matches!(err, PackError::UnknownKind(b'Z')));
        assert!(EntryKind::from_byte(0).is_err());
        assert!(EntryKind::from_byte(255).is_err());
    }

    #[test]
    fn length_header_split() {
        assert!(EntryKind::Contents.has_length_header());
        assert!(EntryKind::CommitV2.has_length_header());
        assert!(EntryKind::InodeV2Root.has_length_header());
        assert!(EntryKind::InodeV2NonRoot.has_length_header());
        assert!(!EntryKind::CommitV1.has_length_header());
        assert!(!EntryKind::InodeV1Stable.has_length_header());
        assert!(!EntryKind::InodeV1Unstable.has_length_header());
    }

    #[test]
    fn inode_kinds() {
        assert!(EntryKind::InodeV2Root.is_inode());
        assert!(EntryKind::InodeV1Stable.is_inode());
        assert!(!EntryKind::Contents.is_inode());
        assert!(!EntryKind::CommitV2.is_inode());
    }

    #[test]
    fn tag_bytes_are_distinct() {
        let mut bytes: Vec<u8> = EntryKind::all().iter().map(|k| k.to_byte()).collect();
        bytes.sort_unstable();
        bytes.dedup();
        assert_eq!(bytes.len(), 7);
    }
}
