//! Content hashing for deduplication and integrity checks

mod content_hasher;

pub use content_hasher::{ContentDigest, ContentHasher, HashSource};
