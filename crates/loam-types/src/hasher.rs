use crate::hash::ObjectHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"loam-node-v1"`) that is
/// prepended to every hash computation. This prevents cross-type hash
/// collisions: a contents blob and an inode chunk with identical bytes will
/// produce different hashes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for contents entries.
    pub const CONTENTS: Self = Self {
        domain: "loam-contents-v1",
    };
    /// Hasher for flat (stable) node values.
    pub const NODE: Self = Self {
        domain: "loam-node-v1",
    };
    /// Hasher for inode chunks (unstable structural hashing).
    pub const INODE: Self = Self {
        domain: "loam-inode-v1",
    };
    /// Hasher for commit entries.
    pub const COMMIT: Self = Self {
        domain: "loam-commit-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ObjectHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ObjectHash::from_digest(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ObjectHash) -> bool {
        self.hash(data) == *expected
    }

    /// Raw BLAKE3 digest without domain separation (for low-level use).
    pub fn raw_hash(data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::NODE.hash(data), ContentHasher::NODE.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let contents = ContentHasher::CONTENTS.hash(data);
        let node = ContentHasher::NODE.hash(data);
        let inode = ContentHasher::INODE.hash(data);
        assert_ne!(contents, node);
        assert_ne!(contents, inode);
        assert_ne!(node, inode);
    }

    #[test]
    fn verify_correct_data() {
        let data = b"test data";
        let h = ContentHasher::CONTENTS.hash(data);
        assert!(ContentHasher::CONTENTS.verify(data, &h));
        assert!(!ContentHasher::CONTENTS.verify(b"tampered", &h));
    }

    #[test]
    fn custom_domain() {
        let hasher = ContentHasher::new("my-custom-domain-v1");
        assert_ne!(hasher.hash(b"data"), ContentHasher::NODE.hash(b"data"));
    }

    #[test]
    fn raw_hash_no_domain() {
        let h1 = ContentHasher::raw_hash(b"test");
        let h2 = ContentHasher::raw_hash(b"test");
        assert_eq!(h1, h2);
        assert_ne!(h1, *ContentHasher::NODE.hash(b"test").as_bytes());
    }
}
