use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::features::files::models::FileRecord;

/// Upload file request DTO for OpenAPI documentation
/// Note: This struct is for Swagger UI documentation only.
/// The actual handler uses axum's Multipart extractor directly.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct UploadFileDto {
    /// The file to upload
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// Destination folder; the default folder when omitted or unknown
    pub folder_id: Option<Uuid>,
}

/// Request DTO for ingesting a file that already exists on the server
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ImportFileDto {
    /// Absolute path of the source file
    #[validate(length(min = 1, max = 4096, message = "path must be 1-4096 characters"))]
    pub path: String,
    /// Destination folder; the default folder when omitted or unknown
    pub folder_id: Option<Uuid>,
    /// Display name; the source file name when omitted
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,
}

/// Outcome of an ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IngestResultDto {
    pub file_id: Uuid,
    /// True when the exact source path was already catalogued
    pub is_duplicate: bool,
    /// Canonical stored location (absolute path or public URL)
    pub stored_location: String,
}

/// Photo attributes read from the image
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PhotoMetadataDto {
    pub taken_at: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// Response DTO for file operations
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileResponseDto {
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Canonical stored location
    pub path: String,
    pub folder_id: Uuid,
    pub mime_type: String,
    /// Persisted size in bytes
    pub size_bytes: i64,
    pub is_compressed: bool,
    /// Hex-encoded SHA-256 of the original content
    pub content_hash: String,
    pub is_photo: bool,
    pub photo: Option<PhotoMetadataDto>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileRecord> for FileResponseDto {
    fn from(f: FileRecord) -> Self {
        let photo = f.is_photo.then(|| PhotoMetadataDto {
            taken_at: f.taken_at,
            camera_make: f.camera_make,
            camera_model: f.camera_model,
            latitude: f.latitude,
            longitude: f.longitude,
            width: f.width,
            height: f.height,
        });

        Self {
            id: f.id,
            name: f.original_name,
            path: f.path,
            folder_id: f.folder_id,
            mime_type: f.mime_type,
            size_bytes: f.size_bytes,
            is_compressed: f.is_compressed,
            content_hash: f.content_hash_hex,
            is_photo: f.is_photo,
            photo,
            tags: f.tags,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }
}

/// Query params for listing files
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListFilesQuery {
    /// Only files directly in this folder
    pub folder_id: Option<Uuid>,
    /// Case-insensitive substring of the display name
    pub search: Option<String>,
    /// Only files carrying this tag
    pub tag: Option<String>,
    /// Only photos (true) or only non-photos (false)
    pub is_photo: Option<bool>,
}

/// Query params for thumbnails
#[derive(Debug, Deserialize, IntoParams)]
pub struct ThumbnailQuery {
    /// Maximum width in pixels (default 256)
    pub max_width: Option<u32>,
    /// Maximum height in pixels (default 256)
    pub max_height: Option<u32>,
}

/// Thumbnail reference for a photo
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThumbnailDto {
    /// Local path of the generated thumbnail or an image-proxy URL
    pub reference: String,
    pub max_width: u32,
    pub max_height: u32,
}

/// Result of re-hashing stored content
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyFileDto {
    pub file_id: Uuid,
    pub expected_hash: String,
    pub actual_hash: String,
    pub matches: bool,
}

/// Request DTO for renaming a file
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RenameFileDto {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
}

/// Request DTO for moving a file
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MoveFileDto {
    pub folder_id: Uuid,
}

/// Request DTO for replacing the tag set of a file
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateTagsDto {
    #[validate(length(max = 50, message = "At most 50 tags are allowed"))]
    pub tags: Vec<String>,
}

/// Query params for deleting a file
#[derive(Debug, Deserialize, IntoParams)]
pub struct DeleteFileQuery {
    /// Remove the record and the stored bytes instead of hiding the file
    #[serde(default)]
    pub permanent: bool,
}

/// Response DTO for delete operations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteFileResponseDto {
    /// Confirmation that the file was deleted
    pub deleted: bool,
    pub permanent: bool,
}
