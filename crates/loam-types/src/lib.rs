//! Foundation types for the Loam content-addressed store.
//!
//! This crate provides the identity, path, and value types shared by every
//! other Loam crate, plus the store-wide configuration knobs.
//!
//! # Key Types
//!
//! - [`ObjectHash`] — Content-addressed identifier (BLAKE3 hash)
//! - [`Key`] — A hash plus an optional `(offset, length)` pack location hint
//! - [`Step`] — One path segment in a tree key
//! - [`Value`] — What a tree binds a step to: contents (with metadata) or a child node
//! - [`TreeConfig`] — Branching factor and stability threshold for inode trees
//! - [`ContentHasher`] — Domain-separated BLAKE3 hasher

pub mod config;
pub mod error;
pub mod hash;
pub mod hasher;
pub mod key;
pub mod step;
pub mod value;

pub use config::TreeConfig;
pub use error::TypeError;
pub use hash::ObjectHash;
pub use hasher::ContentHasher;
pub use key::{Key, PackHint};
pub use step::Step;
pub use value::{Metadata, Value};
