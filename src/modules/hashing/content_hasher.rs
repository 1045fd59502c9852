//! SHA-256 digests of local files and remote resources
//!
//! Local files are streamed through the digest in fixed-size chunks so large
//! uploads never sit in memory. Remote resources are fetched in full first.

use std::path::PathBuf;

use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::core::error::{AppError, Result};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Where the bytes to digest come from
#[derive(Debug, Clone)]
pub enum HashSource {
    Local(PathBuf),
    Remote(String),
}

impl HashSource {
    /// Pick local or remote from a stored location string
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            HashSource::Remote(location.to_string())
        } else {
            HashSource::Local(PathBuf::from(location))
        }
    }
}

/// SHA-256 digest of a file's full content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Computes content digests
#[derive(Clone)]
pub struct ContentHasher {
    http_client: Client,
}

impl ContentHasher {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    pub async fn hash(&self, source: &HashSource) -> Result<ContentDigest> {
        match source {
            HashSource::Local(path) => Self::hash_file(path).await,
            HashSource::Remote(url) => self.hash_remote(url).await,
        }
    }

    /// Digest of bytes already in memory
    pub fn hash_bytes(data: &[u8]) -> ContentDigest {
        ContentDigest(Sha256::digest(data).into())
    }

    async fn hash_file(path: &PathBuf) -> Result<ContentDigest> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {} for hashing: {}", path.display(), e),
            ))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let read = file.read(&mut buffer).await.map_err(|e| {
                AppError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {} for hashing: {}", path.display(), e),
                ))
            })?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        debug!("Hashed {} bytes from {}", total, path.display());
        Ok(ContentDigest(hasher.finalize().into()))
    }

    async fn hash_remote(&self, url: &str) -> Result<ContentDigest> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Failed to fetch '{}': {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Fetching '{}' returned status {}",
                url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read body of '{}': {}", url, e)))?;

        debug!("Hashed {} bytes from {}", body.len(), url);
        Ok(Self::hash_bytes(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // sha256("hello world")
    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_hash_local_file_streams_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let hasher = ContentHasher::new(Client::new());
        let digest = hasher.hash(&HashSource::Local(path)).await.unwrap();

        assert_eq!(digest.hex(), HELLO_WORLD_SHA256);
        assert_eq!(digest.as_bytes().len(), 32);
    }

    #[tokio::test]
    async fn test_hash_large_file_matches_in_memory_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("large.bin");
        let data: Vec<u8> = (0..(READ_CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let hasher = ContentHasher::new(Client::new());
        let digest = hasher.hash(&HashSource::Local(path)).await.unwrap();

        assert_eq!(digest, ContentHasher::hash_bytes(&data));
    }

    #[tokio::test]
    async fn test_hash_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let hasher = ContentHasher::new(Client::new());

        let result = hasher
            .hash(&HashSource::Local(temp.path().join("missing.bin")))
            .await;

        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[test]
    fn test_source_from_location() {
        assert!(matches!(
            HashSource::from_location("https://cdn.example.com/bucket/a"),
            HashSource::Remote(_)
        ));
        assert!(matches!(
            HashSource::from_location("/var/lib/filebase/Default/a.txt"),
            HashSource::Local(_)
        ));
    }
}
