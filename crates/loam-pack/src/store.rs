use loam_types::{Key, ObjectHash};

use crate::entry::RawEntry;
use crate::error::PackResult;

/// Append-only store of framed pack entries.
///
/// All implementations must satisfy these invariants:
/// - Entries are immutable once appended; the pack only ever grows.
/// - `append` is idempotent per hash: re-appending a known hash returns the
///   existing key without writing.
/// - `index` recovers a hinted key for any hash that was previously appended.
/// - Concurrent reads are always safe (entries are immutable).
/// - All I/O errors are propagated, never silently ignored.
pub trait PackStore: Send + Sync {
    /// Whether the entry behind `key` is present.
    fn mem(&self, key: &Key) -> PackResult<bool>;

    /// Read the entry behind `key`.
    ///
    /// Returns `Ok(None)` if the entry does not exist. A key hint is used
    /// for a direct read; an unhinted key goes through the index.
    fn find(&self, key: &Key) -> PackResult<Option<RawEntry>>;

    /// Recover a hinted key from a hash, if the hash was ever appended.
    fn index(&self, hash: &ObjectHash) -> PackResult<Option<Key>>;

    /// Recover the key of the entry starting at `offset`, if any.
    ///
    /// This is the inverse collaborator the codec needs to turn an
    /// offset-indirect address back into a key.
    fn key_at(&self, offset: u64) -> PackResult<Option<Key>>;

    /// Append an entry and return its hinted key.
    ///
    /// The caller supplies the content hash; the store does not re-derive it.
    fn append(&self, hash: &ObjectHash, entry: &RawEntry) -> PackResult<Key>;

    /// Run `f` against this store, then flush any buffered state.
    fn batch(&self, f: &mut dyn FnMut(&dyn PackStore) -> PackResult<()>) -> PackResult<()>;

    /// Persist buffered state (a no-op for purely in-memory stores).
    fn flush(&self) -> PackResult<()>;

    /// Flush and release the store. Further operations fail.
    fn close(&self) -> PackResult<()>;
}
