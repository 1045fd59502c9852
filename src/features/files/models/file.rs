use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::modules::metadata::PhotoMetadata;

/// Database model for files
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: Uuid,
    /// Canonical stored location (absolute local path or public URL)
    pub path: String,
    /// Normalized source path, kept for server-side imports
    pub source_path: Option<String>,
    pub original_name: String,
    pub content_hash: Vec<u8>,
    pub content_hash_hex: String,
    /// Persisted size, which differs from the source size when compressed
    pub size_bytes: i64,
    pub is_compressed: bool,
    pub mime_type: String,
    pub is_photo: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub tags: Vec<String>,
    pub folder_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert a file record
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub path: String,
    pub source_path: Option<String>,
    pub original_name: String,
    pub content_hash: Vec<u8>,
    pub content_hash_hex: String,
    pub size_bytes: i64,
    pub is_compressed: bool,
    pub mime_type: String,
    pub is_photo: bool,
    pub photo: Option<PhotoMetadata>,
    pub folder_id: Uuid,
}

impl FileRecord {
    /// Build the row a fresh insert produces
    pub fn from_new(id: Uuid, new: NewFileRecord, now: DateTime<Utc>) -> Self {
        let photo = new.photo.unwrap_or_default();
        Self {
            id,
            path: new.path,
            source_path: new.source_path,
            original_name: new.original_name,
            content_hash: new.content_hash,
            content_hash_hex: new.content_hash_hex,
            size_bytes: new.size_bytes,
            is_compressed: new.is_compressed,
            mime_type: new.mime_type,
            is_photo: new.is_photo,
            taken_at: photo.taken_at,
            camera_make: photo.camera_make,
            camera_model: photo.camera_model,
            latitude: photo.latitude,
            longitude: photo.longitude,
            width: photo.width.map(|w| w as i32),
            height: photo.height.map(|h| h as i32),
            tags: Vec::new(),
            folder_id: new.folder_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
