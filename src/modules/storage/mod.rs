//! Storage backends for file content
//!
//! `LocalStorage` keeps bytes under a filesystem root, optionally gzipped.
//! `ObjectStorage` keeps them in an S3-compatible bucket and hands out public
//! URLs. Services only see the `StorageBackend` trait.

mod local;
mod object;

use std::path::Path;

use async_trait::async_trait;

use crate::core::error::Result;

pub use local::LocalStorage;
pub use object::ObjectStorage;

/// Where a saved file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Canonical location recorded on the file row
    pub location: String,
    /// Persisted size, which is the compressed size when `compressed`
    pub size_bytes: i64,
    pub compressed: bool,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Location of a root-level folder with the given relative name
    fn folder_location(&self, relative: &str) -> String;

    /// Make sure a folder location can receive files
    async fn ensure_folder(&self, location: &str) -> Result<()>;

    /// Copy `source` to `destination`, never overwriting an existing object
    async fn save(&self, source: &Path, destination: &str, mime_type: &str)
        -> Result<StoredObject>;

    /// Original bytes of a stored file
    async fn read(&self, location: &str, compressed: bool) -> Result<Vec<u8>>;

    /// Remove a stored file. Returns `false` when nothing was there.
    async fn delete(&self, location: &str, recycle: bool) -> Result<bool>;

    /// Move a stored file to `destination`, keeping its compression
    async fn relocate(
        &self,
        location: &str,
        destination: &str,
        compressed: bool,
    ) -> Result<StoredObject>;

    /// Rename a folder location in place
    async fn rename_folder(&self, old_location: &str, new_location: &str) -> Result<()>;

    /// Remove a folder location once it holds nothing
    async fn remove_folder(&self, location: &str) -> Result<()>;

    /// Reference a client can use to show a bounded preview of an image
    async fn thumbnail_reference(
        &self,
        location: &str,
        compressed: bool,
        max_width: u32,
        max_height: u32,
    ) -> Result<String>;
}

/// MIME types whose payload is already compressed
pub(crate) fn is_precompressed(mime_type: &str) -> bool {
    const ARCHIVES: &[&str] = &[
        "application/zip",
        "application/gzip",
        "application/x-gzip",
        "application/x-7z-compressed",
        "application/x-rar-compressed",
        "application/vnd.rar",
        "application/x-bzip2",
        "application/x-xz",
        "application/zstd",
        "application/pdf",
    ];

    mime_type.starts_with("image/")
        || mime_type.starts_with("audio/")
        || mime_type.starts_with("video/")
        || ARCHIVES.contains(&mime_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precompressed_types() {
        assert!(is_precompressed("image/jpeg"));
        assert!(is_precompressed("video/mp4"));
        assert!(is_precompressed("application/zip"));
        assert!(!is_precompressed("text/plain"));
        assert!(!is_precompressed("application/json"));
    }
}
