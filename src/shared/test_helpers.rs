#[cfg(test)]
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tempfile::TempDir;
#[cfg(test)]
use uuid::Uuid;

#[cfg(test)]
use crate::core::config::LocalStorageConfig;
#[cfg(test)]
use crate::core::error::Result;
#[cfg(test)]
use crate::features::files::services::{FileService, ImportRoot, IngestRequest, IngestionService};
#[cfg(test)]
use crate::features::folders::models::{FolderRecord, NewFolderRecord};
#[cfg(test)]
use crate::features::folders::services::{DestinationResolver, FolderService};
#[cfg(test)]
use crate::modules::hashing::ContentHasher;
#[cfg(test)]
use crate::modules::metadata::PhotoMetadataExtractor;
#[cfg(test)]
use crate::modules::persistence::{CatalogRepository, InMemoryCatalogRepository};
#[cfg(test)]
use crate::modules::storage::{LocalStorage, StorageBackend, StoredObject};
#[cfg(test)]
use crate::shared::paths::join_location;

/// A valid JPEG whose APP1 segment claims EXIF but holds garbage
#[cfg(test)]
pub fn jpeg_with_corrupt_exif(width: u32, height: u32) -> Vec<u8> {
    let mut encoded = std::io::Cursor::new(Vec::new());
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]))
        .write_to(&mut encoded, image::ImageFormat::Jpeg)
        .unwrap();
    let encoded = encoded.into_inner();

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0xFF, 0xFF, 0xFF, 0x7F]);
    payload.extend(std::iter::repeat(0xAB).take(24));
    let length = (payload.len() + 2) as u16;

    let mut bytes = encoded[..2].to_vec();
    bytes.extend_from_slice(&[0xFF, 0xE1]);
    bytes.extend_from_slice(&length.to_be_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&encoded[2..]);
    bytes
}

/// Local storage that counts how often bytes were written
#[cfg(test)]
pub struct CountingStorage {
    inner: LocalStorage,
    saves: AtomicUsize,
}

#[cfg(test)]
#[allow(dead_code)]
impl CountingStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl StorageBackend for CountingStorage {
    fn folder_location(&self, relative: &str) -> String {
        self.inner.folder_location(relative)
    }

    async fn ensure_folder(&self, location: &str) -> Result<()> {
        self.inner.ensure_folder(location).await
    }

    async fn save(&self, source: &Path, destination: &str, mime_type: &str) -> Result<StoredObject> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(source, destination, mime_type).await
    }

    async fn read(&self, location: &str, compressed: bool) -> Result<Vec<u8>> {
        self.inner.read(location, compressed).await
    }

    async fn delete(&self, location: &str, recycle: bool) -> Result<bool> {
        self.inner.delete(location, recycle).await
    }

    async fn relocate(
        &self,
        location: &str,
        destination: &str,
        compressed: bool,
    ) -> Result<StoredObject> {
        self.inner.relocate(location, destination, compressed).await
    }

    async fn rename_folder(&self, old_location: &str, new_location: &str) -> Result<()> {
        self.inner.rename_folder(old_location, new_location).await
    }

    async fn remove_folder(&self, location: &str) -> Result<()> {
        self.inner.remove_folder(location).await
    }

    async fn thumbnail_reference(
        &self,
        location: &str,
        compressed: bool,
        max_width: u32,
        max_height: u32,
    ) -> Result<String> {
        self.inner
            .thumbnail_reference(location, compressed, max_width, max_height)
            .await
    }
}

/// In-memory catalog plus temp-dir storage wired like the running service
#[cfg(test)]
pub struct TestContext {
    temp: TempDir,
    pub repository: Arc<InMemoryCatalogRepository>,
    pub storage: Arc<CountingStorage>,
    pub resolver: Arc<DestinationResolver>,
}

#[cfg(test)]
#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Storage that gzips compressible content
    pub fn with_compression() -> Self {
        Self::build(true)
    }

    fn build(compress: bool) -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sources")).unwrap();
        let local = LocalStorage::new(&LocalStorageConfig {
            root: temp.path().join("store"),
            compress,
        })
        .unwrap();

        let repository = Arc::new(InMemoryCatalogRepository::new());
        let storage = Arc::new(CountingStorage::new(local));
        let resolver = Arc::new(DestinationResolver::new(
            repository.clone(),
            storage.clone(),
        ));

        Self {
            temp,
            repository,
            storage,
            resolver,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Path inside the import directory, which is outside the storage root
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.temp.path().join("sources").join(name)
    }

    /// Write a file into the import directory
    pub fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.source_path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Write a blank PNG of the given size, whatever the name's extension
    pub fn write_png(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.source_path(name);
        image::RgbImage::new(width, height)
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();
        path
    }

    pub async fn create_folder(&self, name: &str, parent: Option<&FolderRecord>) -> FolderRecord {
        let path = match parent {
            Some(parent) => join_location(&parent.path, name),
            None => self.storage.folder_location(name),
        };
        self.storage.ensure_folder(&path).await.unwrap();
        self.repository
            .add_folder(NewFolderRecord {
                path,
                name: name.to_string(),
                parent_id: parent.map(|p| p.id),
                is_default: false,
            })
            .await
            .unwrap()
    }

    /// Import content into the default folder
    pub async fn ingest(&self, name: &str, content: &[u8]) -> Uuid {
        let source = self.write_source(name, content);
        self.ingestion_service()
            .ingest(IngestRequest::import(&source, None))
            .await
            .unwrap()
            .file_id
    }

    pub async fn ingest_into(&self, name: &str, content: &[u8], folder: &FolderRecord) -> Uuid {
        let source = self.write_source(name, content);
        self.ingestion_service()
            .ingest(IngestRequest::import(&source, Some(folder.id)))
            .await
            .unwrap()
            .file_id
    }

    pub fn folder_service(&self) -> FolderService {
        FolderService::new(
            self.repository.clone(),
            self.storage.clone(),
            Arc::clone(&self.resolver),
        )
    }

    pub fn ingestion_service(&self) -> IngestionService {
        IngestionService::new(
            self.repository.clone(),
            self.storage.clone(),
            Arc::clone(&self.resolver),
            ContentHasher::new(reqwest::Client::new()),
            PhotoMetadataExtractor::new(),
            ImportRoot::new(self.temp.path().join("sources")),
        )
    }

    pub fn file_service(&self) -> FileService {
        FileService::new(
            self.repository.clone(),
            self.storage.clone(),
            ContentHasher::new(reqwest::Client::new()),
        )
    }
}
