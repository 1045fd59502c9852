//! Persistence layer for file and folder records
//!
//! `CatalogRepository` is the seam the services talk to. PostgreSQL backs it in
//! production; tests run against an in-memory implementation with the same
//! uniqueness rules.

#[cfg(test)]
mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::error::PersistenceError;
use crate::features::files::models::{FileRecord, NewFileRecord};
use crate::features::folders::models::{FolderRecord, NewFolderRecord};

#[cfg(test)]
pub use memory::InMemoryCatalogRepository;
pub use postgres::PgCatalogRepository;

/// Partial unique index on `files.content_hash` for active rows
pub const FILES_ACTIVE_HASH_KEY: &str = "files_active_content_hash_key";

/// Partial unique index allowing a single default folder
pub const FOLDERS_SINGLE_DEFAULT_KEY: &str = "folders_single_default_key";

/// Unique index on (parent, lower(name))
pub const FOLDERS_PARENT_NAME_KEY: &str = "folders_parent_name_key";

pub type RepoResult<T> = std::result::Result<T, PersistenceError>;

/// Filters for listing files
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub folder_id: Option<Uuid>,
    /// Case-insensitive substring of the display name
    pub search: Option<String>,
    pub tag: Option<String>,
    pub is_photo: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

/// Pending record changes committed atomically by `save_changes`
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub folder_updates: Vec<FolderRecord>,
    pub file_updates: Vec<FileRecord>,
    /// Files removed permanently
    pub file_deletes: Vec<Uuid>,
    /// Folders removed in the given order, children before parents
    pub folder_deletes: Vec<Uuid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.folder_updates.is_empty()
            && self.file_updates.is_empty()
            && self.file_deletes.is_empty()
            && self.folder_deletes.is_empty()
    }
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Active file by id
    async fn find_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>>;

    /// Active file whose stored location or recorded source equals `path`
    async fn find_file_by_path(&self, path: &str) -> RepoResult<Option<FileRecord>>;

    /// Active file holding content with this digest
    async fn find_file_by_hash(&self, hash: &[u8]) -> RepoResult<Option<FileRecord>>;

    /// Insert a file; a clashing active hash yields `UniqueViolation(FILES_ACTIVE_HASH_KEY)`
    async fn add_file(&self, file: NewFileRecord) -> RepoResult<FileRecord>;

    /// Persist mutable fields (name, location, folder, tags, activity, size)
    async fn update_file(&self, file: &FileRecord) -> RepoResult<()>;

    /// Remove a file row permanently
    async fn delete_file(&self, id: Uuid) -> RepoResult<()>;

    /// Page of active files plus the total match count
    async fn list_files(&self, query: &FileQuery) -> RepoResult<(Vec<FileRecord>, i64)>;

    /// Files directly inside a folder
    async fn list_files_in_folder(
        &self,
        folder_id: Uuid,
        include_inactive: bool,
    ) -> RepoResult<Vec<FileRecord>>;

    async fn get_folder(&self, id: Uuid) -> RepoResult<Option<FolderRecord>>;

    /// Direct children of `parent_id`, or root folders when `None`
    async fn get_folders_by_parent(&self, parent_id: Option<Uuid>)
        -> RepoResult<Vec<FolderRecord>>;

    async fn find_default_folder(&self) -> RepoResult<Option<FolderRecord>>;

    /// Insert a folder; sibling name or second default clashes yield `UniqueViolation`
    async fn add_folder(&self, folder: NewFolderRecord) -> RepoResult<FolderRecord>;

    async fn list_folders(&self) -> RepoResult<Vec<FolderRecord>>;

    /// Commit a unit of work; nothing is applied if any change fails
    async fn save_changes(&self, changes: ChangeSet) -> RepoResult<()>;
}
