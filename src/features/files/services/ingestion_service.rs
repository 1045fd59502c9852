//! Ingestion of a single source file into the catalog
//!
//! Order matters: nothing is stored before both duplicate checks pass, and the
//! record insert comes last so an abandoned request never leaves a row behind.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::files::dtos::IngestResultDto;
use crate::features::files::models::NewFileRecord;
use crate::features::folders::services::DestinationResolver;
use crate::modules::hashing::{ContentHasher, HashSource};
use crate::modules::metadata::{PhotoMetadata, PhotoMetadataExtractor};
use crate::modules::persistence::{CatalogRepository, FILES_ACTIVE_HASH_KEY};
use crate::modules::storage::{StorageBackend, StoredObject};
use crate::shared::paths::{ensure_safe_source_path, join_location, normalize_location};
use crate::shared::validation::is_valid_entry_name;

/// Where an ingested file comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOrigin {
    /// A file already on the server; must sit under the import root
    Import,
    /// Request body spooled to a temporary file
    Upload,
}

/// A file to bring into the catalog
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source_path: PathBuf,
    /// Name shown to users; the source file name when `None`
    pub display_name: Option<String>,
    /// Requested folder; the default folder when `None` or unknown
    pub folder_id: Option<Uuid>,
    /// Imports remember their source path so re-importing it is recognized
    pub origin: IngestOrigin,
}

impl IngestRequest {
    /// Server-side import of an existing file
    pub fn import(source_path: impl Into<PathBuf>, folder_id: Option<Uuid>) -> Self {
        Self {
            source_path: source_path.into(),
            display_name: None,
            folder_id,
            origin: IngestOrigin::Import,
        }
    }

    /// Upload spooled to a temporary file
    pub fn upload(temp_path: impl Into<PathBuf>, name: String, folder_id: Option<Uuid>) -> Self {
        Self {
            source_path: temp_path.into(),
            display_name: Some(name),
            folder_id,
            origin: IngestOrigin::Upload,
        }
    }
}

/// Directory server-side imports are confined to
#[derive(Debug, Clone)]
pub struct ImportRoot {
    configured: PathBuf,
    canonical: PathBuf,
}

impl ImportRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let configured = root.into();
        let canonical = std::fs::canonicalize(&configured).unwrap_or_else(|_| configured.clone());
        Self {
            configured,
            canonical,
        }
    }

    /// Lexical check, before the filesystem is touched
    fn admits(&self, path: &Path) -> bool {
        path.starts_with(&self.configured) || path.starts_with(&self.canonical)
    }

    /// Check on the resolved path, so symlinks cannot lead outside
    fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.canonical)
    }

    fn reject(&self, path: &Path) -> AppError {
        AppError::Security(format!(
            "Path '{}' is outside the import directory {}",
            path.display(),
            self.configured.display()
        ))
    }
}

/// Runs validation, deduplication, storage, metadata extraction and recording
pub struct IngestionService {
    repository: Arc<dyn CatalogRepository>,
    storage: Arc<dyn StorageBackend>,
    resolver: Arc<DestinationResolver>,
    hasher: ContentHasher,
    extractor: PhotoMetadataExtractor,
    import_root: ImportRoot,
}

impl IngestionService {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        storage: Arc<dyn StorageBackend>,
        resolver: Arc<DestinationResolver>,
        hasher: ContentHasher,
        extractor: PhotoMetadataExtractor,
        import_root: ImportRoot,
    ) -> Self {
        Self {
            repository,
            storage,
            resolver,
            hasher,
            extractor,
            import_root,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResultDto> {
        let source = self.validate_source(&request).await?;
        let normalized = normalize_location(&source.to_string_lossy());

        if let Some(existing) = self.repository.find_file_by_path(&normalized).await? {
            debug!("{} is already catalogued as {}", normalized, existing.id);
            return Ok(IngestResultDto {
                file_id: existing.id,
                is_duplicate: true,
                stored_location: existing.path,
            });
        }

        let digest = self.hasher.hash(&HashSource::Local(source.clone())).await?;
        if let Some(existing) = self.repository.find_file_by_hash(digest.as_bytes()).await? {
            return Err(AppError::DuplicateContent {
                file_id: existing.id,
                location: existing.path,
            });
        }

        let display_name = Self::display_name(&request, &source)?;

        // The sniffed type of a photo wins over its name, so storage never
        // gzips image bytes hiding behind a name like "scan.dat"
        let (mime_type, is_photo, photo) = match self.photo_metadata(&source).await {
            Some((sniffed, photo)) => (sniffed, true, photo),
            None => (
                mime_guess::from_path(&display_name)
                    .first_or_octet_stream()
                    .to_string(),
                false,
                None,
            ),
        };

        let folder = self.resolver.resolve(request.folder_id).await?;
        self.storage.ensure_folder(&folder.path).await?;

        let stored = self
            .storage
            .save(&source, &join_location(&folder.path, &display_name), &mime_type)
            .await?;

        let inserted = self
            .repository
            .add_file(NewFileRecord {
                path: stored.location.clone(),
                source_path: (request.origin == IngestOrigin::Import).then(|| normalized.clone()),
                original_name: display_name,
                content_hash: digest.to_vec(),
                content_hash_hex: digest.hex(),
                size_bytes: stored.size_bytes,
                is_compressed: stored.compressed,
                mime_type,
                is_photo,
                photo,
                folder_id: folder.id,
            })
            .await;

        let record = match inserted {
            Ok(record) => record,
            Err(e) if e.violates(FILES_ACTIVE_HASH_KEY) => {
                // A concurrent ingestion of the same bytes committed first
                self.discard(&stored).await;
                let existing = self
                    .repository
                    .find_file_by_hash(digest.as_bytes())
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict(format!(
                            "Content {} was claimed concurrently and then removed",
                            digest.hex()
                        ))
                    })?;
                return Err(AppError::DuplicateContent {
                    file_id: existing.id,
                    location: existing.path,
                });
            }
            Err(e) => {
                self.discard(&stored).await;
                return Err(e.into());
            }
        };

        info!(
            "Ingested {} as file {} at {} ({} bytes, photo: {})",
            normalized, record.id, record.path, record.size_bytes, record.is_photo
        );

        Ok(IngestResultDto {
            file_id: record.id,
            is_duplicate: false,
            stored_location: stored.location,
        })
    }

    /// Reject unsafe paths and resolve the source to a canonical regular file.
    /// Imports must also resolve inside the import root.
    async fn validate_source(&self, request: &IngestRequest) -> Result<PathBuf> {
        let path = request.source_path.as_path();
        ensure_safe_source_path(path)?;

        let confined = request.origin == IngestOrigin::Import;
        if confined && !self.import_root.admits(path) {
            return Err(self.import_root.reject(path));
        }

        let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                AppError::NotFound(format!("Source file '{}' not found", path.display()))
            } else {
                AppError::Io(e)
            }
        })?;

        if confined && !self.import_root.contains(&canonical) {
            return Err(self.import_root.reject(path));
        }

        let metadata = tokio::fs::metadata(&canonical).await?;
        if !metadata.is_file() {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }
        Ok(canonical)
    }

    fn display_name(request: &IngestRequest, source: &Path) -> Result<String> {
        let name = match &request.display_name {
            Some(name) => name.trim().to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        if !is_valid_entry_name(&name) {
            return Err(AppError::Validation(format!(
                "'{}' is not a valid file name",
                name
            )));
        }
        Ok(name)
    }

    /// Sniffed image type and metadata of a decodable image.
    ///
    /// Anything that cannot be decoded is stored as a plain file. A decodable
    /// image with missing or corrupt EXIF is still a photo, with those fields empty.
    async fn photo_metadata(&self, source: &Path) -> Option<(String, Option<PhotoMetadata>)> {
        let image_type = match self.extractor.image_type(source).await {
            Ok(Some(image_type)) => image_type,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not probe {} for image content: {}", source.display(), e);
                return None;
            }
        };

        match self.extractor.extract(source).await {
            Ok(photo) => Some((image_type.to_string(), photo)),
            Err(AppError::UnsupportedFormat(reason)) => {
                warn!("Storing {} as a plain file: {}", source.display(), reason);
                None
            }
            Err(e) => {
                warn!("Metadata extraction failed for {}: {}", source.display(), e);
                None
            }
        }
    }

    async fn discard(&self, stored: &StoredObject) {
        match self.storage.delete(&stored.location, false).await {
            Ok(true) => debug!("Removed orphaned object {}", stored.location),
            Ok(false) => debug!("Orphaned object {} was already gone", stored.location),
            Err(e) => warn!("Failed to remove orphaned object {}: {}", stored.location, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_helpers::{jpeg_with_corrupt_exif, TestContext};
    use fake::faker::lorem::en::Word;
    use fake::Fake;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_ingest_stores_and_records() {
        let ctx = TestContext::new();
        let word: String = Word().fake();
        let content = format!("notes about {}", word);
        let source = ctx.write_source("notes.txt", content.as_bytes());

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&source, None))
            .await
            .unwrap();

        assert!(!result.is_duplicate);
        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        let default = ctx.resolver.default_folder().await.unwrap();
        assert_eq!(record.folder_id, default.id);
        assert_eq!(record.path, join_location(&default.path, "notes.txt"));
        assert_eq!(record.mime_type, "text/plain");
        assert_eq!(record.content_hash_hex, ContentHasher::hash_bytes(content.as_bytes()).hex());
        assert!(!record.is_photo);
        assert_eq!(
            record.source_path.as_deref(),
            Some(normalize_location(&source.canonicalize().unwrap().to_string_lossy()).as_str())
        );
        assert_eq!(std::fs::read(&record.path).unwrap(), content.as_bytes());
    }

    #[tokio::test]
    async fn test_exact_path_reupload_saves_once() {
        let ctx = TestContext::new();
        let source = ctx.write_source("report.pdf", b"%PDF-1.4 quarterly report");
        let service = ctx.ingestion_service();

        let first = service.ingest(IngestRequest::import(&source, None)).await.unwrap();
        let second = service.ingest(IngestRequest::import(&source, None)).await.unwrap();

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(first.file_id, second.file_id);
        assert_eq!(first.stored_location, second.stored_location);
        assert_eq!(ctx.storage.save_count(), 1);
        assert_eq!(ctx.repository.all_files().len(), 1);
    }

    #[tokio::test]
    async fn test_same_content_elsewhere_is_rejected() {
        let ctx = TestContext::new();
        let service = ctx.ingestion_service();
        let a = ctx.write_source("a.txt", b"identical bytes");
        let b = ctx.write_source("b.txt", b"identical bytes");

        let first = service.ingest(IngestRequest::import(&a, None)).await.unwrap();
        let second = service.ingest(IngestRequest::import(&b, None)).await;

        match second {
            Err(AppError::DuplicateContent { file_id, location }) => {
                assert_eq!(file_id, first.file_id);
                assert_eq!(location, first.stored_location);
            }
            other => panic!("expected duplicate content, got {:?}", other),
        }
        assert_eq!(ctx.storage.save_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_content_yields_one_record() {
        let ctx = TestContext::new();
        let service = Arc::new(ctx.ingestion_service());
        let sources: Vec<PathBuf> = (0..8)
            .map(|i| ctx.write_source(&format!("copy-{}.txt", i), b"shared payload"))
            .collect();

        let handles = sources.into_iter().map(|source| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.ingest(IngestRequest::import(source, None)).await })
        });
        let results: Vec<Result<IngestResultDto>> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::DuplicateContent { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(ctx.repository.all_files().len(), 1);

        let default = ctx.resolver.default_folder().await.unwrap();
        let stored = std::fs::read_dir(&default.path).unwrap().count();
        assert_eq!(stored, 1, "losing uploads must not leave stored objects behind");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_share_one_default_folder() {
        let ctx = TestContext::new();
        let service = Arc::new(ctx.ingestion_service());
        let sources: Vec<PathBuf> = (0..8)
            .map(|i| ctx.write_source(&format!("unique-{}.txt", i), format!("payload {}", i).as_bytes()))
            .collect();

        let handles = sources.into_iter().map(|source| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.ingest(IngestRequest::import(source, None)).await })
        });
        for joined in join_all(handles).await {
            joined.unwrap().unwrap();
        }

        let folders = ctx.repository.list_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_default);
        let files = ctx.repository.all_files();
        assert_eq!(files.len(), 8);
        assert!(files.iter().all(|f| f.folder_id == folders[0].id));
    }

    #[tokio::test]
    async fn test_unsafe_and_missing_sources() {
        let ctx = TestContext::new();
        let service = ctx.ingestion_service();

        let climbing = service
            .ingest(IngestRequest::import("/tmp/../etc/passwd", None))
            .await;
        let home = service.ingest(IngestRequest::import("~/secret.txt", None)).await;
        let missing = service
            .ingest(IngestRequest::import(ctx.source_path("nope.txt"), None))
            .await;
        std::fs::create_dir(ctx.source_path("album")).unwrap();
        let directory = service
            .ingest(IngestRequest::import(ctx.source_path("album"), None))
            .await;

        assert!(matches!(climbing, Err(AppError::Security(_))));
        assert!(matches!(home, Err(AppError::Security(_))));
        assert!(matches!(missing, Err(AppError::NotFound(_))));
        assert!(matches!(directory, Err(AppError::BadRequest(_))));
        assert_eq!(ctx.storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_jpeg_is_stored_as_plain_file() {
        let ctx = TestContext::new();
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat(0u8).take(128));
        let source = ctx.write_source("broken.jpg", &bytes);

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&source, None))
            .await
            .unwrap();

        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        assert!(!record.is_photo);
        assert_eq!(record.width, None);
        assert_eq!(record.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_png_gets_dimensions() {
        let ctx = TestContext::new();
        let source = ctx.write_png("pixel.png", 12, 7);

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&source, None))
            .await
            .unwrap();

        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        assert!(record.is_photo);
        assert_eq!((record.width, record.height), (Some(12), Some(7)));
        assert_eq!(record.taken_at, None);
    }

    #[tokio::test]
    async fn test_unknown_folder_falls_back_to_default() {
        let ctx = TestContext::new();
        let source = ctx.write_source("memo.txt", b"memo");

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&source, Some(Uuid::now_v7())))
            .await
            .unwrap();

        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        let default = ctx.resolver.default_folder().await.unwrap();
        assert_eq!(record.folder_id, default.id);
    }

    #[tokio::test]
    async fn test_upload_does_not_record_temp_path() {
        let ctx = TestContext::new();
        let temp = ctx.write_source(".tmpAbC123", b"uploaded body");

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::upload(&temp, "holiday.txt".to_string(), None))
            .await
            .unwrap();

        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        assert_eq!(record.original_name, "holiday.txt");
        assert_eq!(record.source_path, None);
    }

    #[tokio::test]
    async fn test_import_is_confined_to_import_root() {
        let ctx = TestContext::new();
        let service = ctx.ingestion_service();
        let outside = ctx.temp_path().join("outside.txt");
        std::fs::write(&outside, b"not for import").unwrap();

        let sibling = service.ingest(IngestRequest::import(&outside, None)).await;
        let system = service
            .ingest(IngestRequest::import("/etc/passwd", None))
            .await;

        assert!(matches!(sibling, Err(AppError::Security(_))));
        assert!(matches!(system, Err(AppError::Security(_))));
        assert_eq!(ctx.storage.save_count(), 0);
        assert!(ctx.repository.all_files().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_import_root_is_rejected() {
        let ctx = TestContext::new();
        let outside = ctx.temp_path().join("secret.txt");
        std::fs::write(&outside, b"private").unwrap();
        let link = ctx.source_path("innocent.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&link, None))
            .await;

        assert!(matches!(result, Err(AppError::Security(_))));
        assert_eq!(ctx.storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_uploads_are_not_confined_to_import_root() {
        let ctx = TestContext::new();
        let spooled = ctx.temp_path().join(".tmpUpload");
        std::fs::write(&spooled, b"request body").unwrap();

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::upload(&spooled, "body.txt".to_string(), None))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_exif_is_still_a_photo() {
        let ctx = TestContext::new();
        let source = ctx.write_source("camera.jpg", &jpeg_with_corrupt_exif(8, 8));

        let result = ctx
            .ingestion_service()
            .ingest(IngestRequest::import(&source, None))
            .await
            .unwrap();

        let record = ctx.repository.find_file(result.file_id).await.unwrap().unwrap();
        assert!(record.is_photo);
        assert_eq!((record.width, record.height), (Some(8), Some(8)));
        assert_eq!(record.taken_at, None);
        assert_eq!(record.camera_model, None);
    }
}
