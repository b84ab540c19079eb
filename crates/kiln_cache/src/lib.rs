//! Persistent per-target build cache.
//!
//! Each build target owns one snapshot file recording the content digests of
//! its sources and outputs and which outputs each source produced. The
//! [`CacheStore`] loads snapshots fail-safe (any problem is a cache miss),
//! writes them atomically, and keeps a JSON index of the stored targets.

#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod hasher;
pub mod index;
pub mod snapshot;
pub mod store;

pub use error::CacheError;
pub use hasher::{hash_file, hash_files, HashedFiles};
pub use index::{CacheIndex, IndexEntry};
pub use snapshot::CacheSnapshot;
pub use store::CacheStore;
