use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// File metadata attached to a contents binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metadata {
    /// Normal file (0o100644). The designated default.
    #[default]
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
}

impl Metadata {
    /// Octal mode value (for display/serialization).
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
        }
    }

    /// Parse from an octal mode value.
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            _ => None,
        }
    }

    /// Returns `true` for the designated default.
    pub fn is_default(&self) -> bool {
        *self == Self::Regular
    }

    /// Single-byte tag used by the codecs.
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Regular => 0,
            Self::Executable => 1,
            Self::Symlink => 2,
        }
    }

    /// Parse a codec tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Regular),
            1 => Some(Self::Executable),
            2 => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// What a tree binds a step to: contents with metadata, or a child node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Contents { key: Key, metadata: Metadata },
    Node { key: Key },
}

impl Value {
    /// A contents binding with default metadata.
    pub fn contents(key: Key) -> Self {
        Self::Contents {
            key,
            metadata: Metadata::default(),
        }
    }

    /// A contents binding with explicit metadata.
    pub fn contents_with(key: Key, metadata: Metadata) -> Self {
        Self::Contents { key, metadata }
    }

    /// A child-node binding.
    pub fn node(key: Key) -> Self {
        Self::Node { key }
    }

    /// The referenced key, whichever variant this is.
    pub fn key(&self) -> Key {
        match self {
            Self::Contents { key, .. } | Self::Node { key } => *key,
        }
    }

    /// Returns `true` for a child-node binding.
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectHash;

    #[test]
    fn metadata_default_is_regular() {
        assert_eq!(Metadata::default(), Metadata::Regular);
        assert!(Metadata::Regular.is_default());
        assert!(!Metadata::Executable.is_default());
    }

    #[test]
    fn metadata_mode_bits_roundtrip() {
        for meta in [Metadata::Regular, Metadata::Executable, Metadata::Symlink] {
            assert_eq!(Metadata::from_mode_bits(meta.mode_bits()), Some(meta));
            assert_eq!(Metadata::from_byte(meta.to_byte()), Some(meta));
        }
    }

    #[test]
    fn metadata_unknown_bits() {
        assert!(Metadata::from_mode_bits(0o777).is_none());
        assert!(Metadata::from_byte(9).is_none());
    }

    #[test]
    fn value_key_projection() {
        let key = Key::unhinted(ObjectHash::from_bytes(b"blob"));
        assert_eq!(Value::contents(key).key(), key);
        assert_eq!(Value::node(key).key(), key);
    }

    #[test]
    fn value_equality_sees_metadata() {
        let key = Key::unhinted(ObjectHash::from_bytes(b"blob"));
        assert_ne!(
            Value::contents(key),
            Value::contents_with(key, Metadata::Executable)
        );
        assert_ne!(Value::contents(key), Value::node(key));
    }
}
