use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database model for folders
#[derive(Debug, Clone, FromRow)]
pub struct FolderRecord {
    pub id: Uuid,
    /// Storage location of the folder; children extend it with `/<name>`
    pub path: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    /// Set on the single fallback destination folder
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert a folder record
#[derive(Debug, Clone)]
pub struct NewFolderRecord {
    pub path: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub is_default: bool,
}

impl FolderRecord {
    pub fn from_new(id: Uuid, new: NewFolderRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            path: new.path,
            name: new.name,
            parent_id: new.parent_id,
            is_default: new.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}
