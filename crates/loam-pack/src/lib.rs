//! Pack storage for the Loam store.
//!
//! An append-only pack file holds framed, content-addressed entries; a
//! fan-out index sidecar maps hashes back to `(offset, length, kind)`.
//!
//! # Architecture
//!
//! - **Entry framing** ([`RawEntry`]): `[kind][length][payload]`, with legacy
//!   kinds size-probed instead of length-prefixed
//! - **Pack index** ([`PackIndex`]): fan-out table + sorted hashes for
//!   O(log n) lookups
//! - **Dictionary** ([`Dict`]): 16-bit ids for recurring short strings
//! - **[`PackStore`]**: the append/find/index surface the node layer consumes
//! - **[`MemPackStore`] / [`FilePackStore`]**: in-memory and on-disk backends

pub mod dict;
pub mod entry;
pub mod error;
pub mod file;
pub mod index;
pub mod kind;
pub mod memory;
pub mod store;

pub use dict::Dict;
pub use entry::{decode_varint, encode_varint, RawEntry};
pub use error::{PackError, PackResult};
pub use file::FilePackStore;
pub use index::{IndexEntry, PackIndex};
pub use kind::EntryKind;
pub use memory::MemPackStore;
pub use store::PackStore;
