use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::files::dtos::{
    FileResponseDto, ListFilesQuery, ThumbnailDto, VerifyFileDto,
};
use crate::features::files::models::FileRecord;
use crate::modules::hashing::{ContentHasher, HashSource};
use crate::modules::persistence::{CatalogRepository, FileQuery};
use crate::modules::storage::StorageBackend;
use crate::shared::constants::{DEFAULT_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE};
use crate::shared::paths::join_location;
use crate::shared::types::PaginationQuery;
use crate::shared::validation::{is_valid_entry_name, normalize_tags};

/// Raw content of a stored file
#[derive(Debug)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub name: String,
}

/// Service for file operations after ingestion
pub struct FileService {
    repository: Arc<dyn CatalogRepository>,
    storage: Arc<dyn StorageBackend>,
    hasher: ContentHasher,
}

impl FileService {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        storage: Arc<dyn StorageBackend>,
        hasher: ContentHasher,
    ) -> Self {
        Self {
            repository,
            storage,
            hasher,
        }
    }

    async fn find(&self, id: Uuid) -> Result<FileRecord> {
        self.repository
            .find_file(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    pub async fn get(&self, id: Uuid) -> Result<FileResponseDto> {
        Ok(self.find(id).await?.into())
    }

    /// Search active files, newest first
    pub async fn list(
        &self,
        query: ListFilesQuery,
        pagination: &PaginationQuery,
    ) -> Result<(Vec<FileResponseDto>, i64)> {
        let filter = FileQuery {
            folder_id: query.folder_id,
            search: query
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            tag: query
                .tag
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
            is_photo: query.is_photo,
            limit: pagination.limit(),
            offset: pagination.offset(),
        };

        let (files, total) = self.repository.list_files(&filter).await?;
        Ok((files.into_iter().map(Into::into).collect(), total))
    }

    pub async fn content(&self, id: Uuid) -> Result<FileContent> {
        let file = self.find(id).await?;
        let bytes = self.storage.read(&file.path, file.is_compressed).await?;
        Ok(FileContent {
            bytes,
            mime_type: file.mime_type,
            name: file.original_name,
        })
    }

    pub async fn thumbnail(
        &self,
        id: Uuid,
        max_width: Option<u32>,
        max_height: Option<u32>,
    ) -> Result<ThumbnailDto> {
        let file = self.find(id).await?;
        if !file.is_photo {
            return Err(AppError::UnsupportedFormat(format!(
                "File {} is not a photo",
                id
            )));
        }

        let max_width = max_width
            .unwrap_or(DEFAULT_THUMBNAIL_SIZE)
            .clamp(1, MAX_THUMBNAIL_SIZE);
        let max_height = max_height
            .unwrap_or(DEFAULT_THUMBNAIL_SIZE)
            .clamp(1, MAX_THUMBNAIL_SIZE);

        let reference = self
            .storage
            .thumbnail_reference(&file.path, file.is_compressed, max_width, max_height)
            .await?;

        Ok(ThumbnailDto {
            reference,
            max_width,
            max_height,
        })
    }

    /// Re-hash the stored content and compare it with the recorded digest
    pub async fn verify(&self, id: Uuid) -> Result<VerifyFileDto> {
        let file = self.find(id).await?;

        let digest = if file.is_compressed {
            let bytes = self.storage.read(&file.path, true).await?;
            ContentHasher::hash_bytes(&bytes)
        } else {
            self.hasher.hash(&HashSource::from_location(&file.path)).await?
        };

        let actual_hash = digest.hex();
        let matches = actual_hash == file.content_hash_hex;
        if !matches {
            warn!(
                "Integrity check failed for file {}: expected {}, found {}",
                id, file.content_hash_hex, actual_hash
            );
        }

        Ok(VerifyFileDto {
            file_id: id,
            expected_hash: file.content_hash_hex,
            actual_hash,
            matches,
        })
    }

    /// Change the display name; the stored location stays as it is
    pub async fn rename(&self, id: Uuid, name: &str) -> Result<FileResponseDto> {
        let name = name.trim();
        if !is_valid_entry_name(name) {
            return Err(AppError::Validation(format!(
                "'{}' is not a valid file name",
                name
            )));
        }

        let mut file = self.find(id).await?;
        file.original_name = name.to_string();
        self.repository.update_file(&file).await?;

        debug!("Renamed file {} to '{}'", id, name);
        Ok(file.into())
    }

    /// Move a file and its stored content to another folder
    pub async fn move_to(&self, id: Uuid, folder_id: Uuid) -> Result<FileResponseDto> {
        let mut file = self.find(id).await?;
        if file.folder_id == folder_id {
            return Ok(file.into());
        }

        let folder = self
            .repository
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Folder {} not found", folder_id)))?;
        self.storage.ensure_folder(&folder.path).await?;

        let old_location = file.path.clone();
        let stored = self
            .storage
            .relocate(
                &old_location,
                &join_location(&folder.path, &file.original_name),
                file.is_compressed,
            )
            .await?;

        file.path = stored.location.clone();
        file.folder_id = folder.id;
        file.size_bytes = stored.size_bytes;
        file.is_compressed = stored.compressed;

        if let Err(e) = self.repository.update_file(&file).await {
            warn!(
                "Recording the move of file {} failed, moving {} back",
                id, stored.location
            );
            if let Err(revert) = self
                .storage
                .relocate(&stored.location, &old_location, stored.compressed)
                .await
            {
                warn!("Could not restore {}: {}", old_location, revert);
            }
            return Err(e.into());
        }

        info!("Moved file {} to folder {} at {}", id, folder.id, file.path);
        Ok(file.into())
    }

    /// Replace the tag set
    pub async fn set_tags(&self, id: Uuid, tags: &[String]) -> Result<FileResponseDto> {
        let mut file = self.find(id).await?;
        file.tags = normalize_tags(tags);
        self.repository.update_file(&file).await?;
        Ok(file.into())
    }

    /// Hide a file, or remove the record and its bytes when `permanent`
    pub async fn delete(&self, id: Uuid, permanent: bool) -> Result<()> {
        let mut file = self.find(id).await?;

        if !permanent {
            file.is_active = false;
            self.repository.update_file(&file).await?;
            info!("File soft deleted: id={}, path={}", file.id, file.path);
            return Ok(());
        }

        self.repository.delete_file(id).await?;
        match self.storage.delete(&file.path, false).await {
            Ok(true) => {}
            Ok(false) => warn!("Stored content of file {} was already gone", id),
            Err(e) => warn!("Failed to remove stored content of file {}: {}", id, e),
        }
        info!("File permanently deleted: id={}, path={}", file.id, file.path);
        Ok(())
    }
}
