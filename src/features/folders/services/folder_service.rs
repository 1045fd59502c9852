use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::files::models::FileRecord;
use crate::features::folders::dtos::{FolderDeletionDto, FolderTreeDto};
use crate::features::folders::models::{FolderRecord, NewFolderRecord};
use crate::features::folders::services::DestinationResolver;
use crate::modules::persistence::{CatalogRepository, ChangeSet, FOLDERS_PARENT_NAME_KEY};
use crate::modules::storage::StorageBackend;
use crate::shared::constants::DEFAULT_FOLDER_NAME;
use crate::shared::paths::{join_location, normalize_location, parent_location, replace_prefix};
use crate::shared::types::ApiResponse;
use crate::shared::validation::is_valid_entry_name;

/// Stored files removed in parallel after a cascade delete commits
const STORAGE_DELETE_CONCURRENCY: usize = 8;

/// Business-rule refusals of a folder operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderRejection {
    DefaultFolderProtected,
    NotEmpty { folders: usize, files: usize },
    NameCollision(String),
    InvalidName(String),
}

impl FolderRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            FolderRejection::InvalidName(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::CONFLICT,
        }
    }
}

impl fmt::Display for FolderRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderRejection::DefaultFolderProtected => {
                write!(f, "The default folder cannot be deleted")
            }
            FolderRejection::NotEmpty { folders, files } => write!(
                f,
                "Folder contains {} subfolder(s) and {} file(s); delete with cascade=true",
                folders, files
            ),
            FolderRejection::NameCollision(name) => {
                write!(f, "A folder named '{}' already exists here", name)
            }
            FolderRejection::InvalidName(name) => write!(f, "'{}' is not a valid folder name", name),
        }
    }
}

impl IntoResponse for FolderRejection {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()>::error(Some(self.to_string()), None));
        (self.status(), body).into_response()
    }
}

/// Result of a folder operation that business rules may refuse
#[derive(Debug)]
pub enum FolderOutcome<T> {
    Completed(T),
    Rejected(FolderRejection),
}

/// Service for folder operations
pub struct FolderService {
    repository: Arc<dyn CatalogRepository>,
    storage: Arc<dyn StorageBackend>,
    resolver: Arc<DestinationResolver>,
}

impl FolderService {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        storage: Arc<dyn StorageBackend>,
        resolver: Arc<DestinationResolver>,
    ) -> Self {
        Self {
            repository,
            storage,
            resolver,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<FolderRecord> {
        self.repository
            .get_folder(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Folder {} not found", id)))
    }

    /// Direct children of a folder, or root folders
    pub async fn list_children(&self, parent_id: Option<Uuid>) -> Result<Vec<FolderRecord>> {
        if let Some(id) = parent_id {
            self.get(id).await?;
        }
        Ok(self.repository.get_folders_by_parent(parent_id).await?)
    }

    pub async fn tree(&self) -> Result<Vec<FolderTreeDto>> {
        let folders = self.repository.list_folders().await?;
        Ok(FolderTreeDto::build_tree(folders))
    }

    pub async fn create(
        &self,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<FolderOutcome<FolderRecord>> {
        let name = name.trim();
        if !is_valid_entry_name(name) {
            return Ok(FolderOutcome::Rejected(FolderRejection::InvalidName(
                name.to_string(),
            )));
        }

        let path = match parent_id {
            Some(id) => join_location(&self.get(id).await?.path, name),
            None if name.eq_ignore_ascii_case(DEFAULT_FOLDER_NAME) => {
                return Ok(FolderOutcome::Rejected(FolderRejection::NameCollision(
                    name.to_string(),
                )));
            }
            None => self.storage.folder_location(name),
        };

        if self.has_sibling_named(parent_id, name, None).await? {
            return Ok(FolderOutcome::Rejected(FolderRejection::NameCollision(
                name.to_string(),
            )));
        }

        self.storage.ensure_folder(&path).await?;

        let created = self
            .repository
            .add_folder(NewFolderRecord {
                path,
                name: name.to_string(),
                parent_id,
                is_default: false,
            })
            .await;

        match created {
            Ok(folder) => {
                info!("Created folder {} at {}", folder.id, folder.path);
                Ok(FolderOutcome::Completed(folder))
            }
            Err(e) if e.violates(FOLDERS_PARENT_NAME_KEY) => Ok(FolderOutcome::Rejected(
                FolderRejection::NameCollision(name.to_string()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a folder and rewrite the paths of everything below it
    pub async fn rename(&self, id: Uuid, new_name: &str) -> Result<FolderOutcome<FolderRecord>> {
        let new_name = new_name.trim();
        if !is_valid_entry_name(new_name) {
            return Ok(FolderOutcome::Rejected(FolderRejection::InvalidName(
                new_name.to_string(),
            )));
        }

        let folder = self.get(id).await?;
        if folder.name == new_name {
            return Ok(FolderOutcome::Completed(folder));
        }

        let reserved = folder.parent_id.is_none()
            && !folder.is_default
            && new_name.eq_ignore_ascii_case(DEFAULT_FOLDER_NAME);
        if reserved
            || self
                .has_sibling_named(folder.parent_id, new_name, Some(folder.id))
                .await?
        {
            return Ok(FolderOutcome::Rejected(FolderRejection::NameCollision(
                new_name.to_string(),
            )));
        }

        let old_path = folder.path.clone();
        let new_path = match parent_location(&old_path) {
            Some(parent) => join_location(parent, new_name),
            None => new_name.to_string(),
        };

        let mut renamed = folder.clone();
        renamed.name = new_name.to_string();
        renamed.path = new_path.clone();

        let mut changes = self.cascade_path_changes(&folder, &old_path, &new_path).await?;
        changes.folder_updates.insert(0, renamed.clone());

        self.storage.rename_folder(&old_path, &new_path).await?;

        if let Err(e) = self.repository.save_changes(changes).await {
            if let Err(revert) = self.storage.rename_folder(&new_path, &old_path).await {
                warn!(
                    "Could not move {} back to {} after a failed rename: {}",
                    new_path, old_path, revert
                );
            }
            if e.violates(FOLDERS_PARENT_NAME_KEY) {
                return Ok(FolderOutcome::Rejected(FolderRejection::NameCollision(
                    new_name.to_string(),
                )));
            }
            return Err(e.into());
        }

        info!("Renamed folder {} from {} to {}", id, old_path, new_path);
        Ok(FolderOutcome::Completed(renamed))
    }

    /// Path rewrites for every descendant folder and contained file, parents first
    async fn cascade_path_changes(
        &self,
        root: &FolderRecord,
        old_path: &str,
        new_path: &str,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let mut visited = HashSet::new();
        let mut stack = vec![root.id];

        while let Some(folder_id) = stack.pop() {
            if !visited.insert(folder_id) {
                warn!("Folder {} reached twice while renaming; skipping cycle", folder_id);
                continue;
            }

            for mut file in self.repository.list_files_in_folder(folder_id, true).await? {
                if let Some(path) = replace_prefix(&file.path, old_path, new_path) {
                    file.path = path;
                    changes.file_updates.push(file);
                }
            }

            for mut child in self.repository.get_folders_by_parent(Some(folder_id)).await? {
                stack.push(child.id);
                if let Some(path) = replace_prefix(&child.path, old_path, new_path) {
                    child.path = path;
                    changes.folder_updates.push(child);
                }
            }
        }

        Ok(changes)
    }

    /// Whether a folder is the protected default folder.
    ///
    /// The stored flag decides. Root folders without the flag still count when
    /// their name or location matches what the default folder would use.
    pub fn is_protected(&self, folder: &FolderRecord) -> bool {
        if folder.is_default {
            return true;
        }
        if folder.parent_id.is_some() {
            return false;
        }

        let path = normalize_location(&folder.path);
        folder.name.eq_ignore_ascii_case(DEFAULT_FOLDER_NAME)
            || path == normalize_location(&self.resolver.expected_default_location())
            || path.ends_with(&format!("/{}", DEFAULT_FOLDER_NAME))
    }

    /// Delete a folder, recursively when `cascade` is set
    pub async fn delete(
        &self,
        id: Uuid,
        cascade: bool,
    ) -> Result<FolderOutcome<FolderDeletionDto>> {
        let folder = self.get(id).await?;
        if self.is_protected(&folder) {
            return Ok(FolderOutcome::Rejected(
                FolderRejection::DefaultFolderProtected,
            ));
        }

        if !cascade {
            let subfolders = self.repository.get_folders_by_parent(Some(id)).await?.len();
            let files = self
                .repository
                .list_files_in_folder(id, false)
                .await?
                .len();
            if subfolders > 0 || files > 0 {
                return Ok(FolderOutcome::Rejected(FolderRejection::NotEmpty {
                    folders: subfolders,
                    files,
                }));
            }
        }

        let mut folders: Vec<FolderRecord> = Vec::new();
        let mut files: Vec<FileRecord> = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![folder];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.id) {
                warn!("Folder {} reached twice while deleting; skipping cycle", current.id);
                continue;
            }
            files.extend(self.repository.list_files_in_folder(current.id, true).await?);
            for child in self.repository.get_folders_by_parent(Some(current.id)).await? {
                if self.is_protected(&child) {
                    return Ok(FolderOutcome::Rejected(
                        FolderRejection::DefaultFolderProtected,
                    ));
                }
                stack.push(child);
            }
            folders.push(current);
        }

        // Pre-order reversed: every folder comes after all of its descendants
        folders.reverse();

        let changes = ChangeSet {
            file_deletes: files.iter().map(|f| f.id).collect(),
            folder_deletes: folders.iter().map(|f| f.id).collect(),
            ..ChangeSet::default()
        };
        self.repository.save_changes(changes).await?;

        stream::iter(&files)
            .for_each_concurrent(STORAGE_DELETE_CONCURRENCY, |file| async move {
                if let Err(e) = self.storage.delete(&file.path, false).await {
                    warn!("Failed to remove stored content {}: {}", file.path, e);
                }
            })
            .await;
        for removed in &folders {
            if let Err(e) = self.storage.remove_folder(&removed.path).await {
                warn!("Failed to remove folder location {}: {}", removed.path, e);
            }
        }

        info!(
            "Deleted folder {} with {} folder(s) and {} file(s)",
            id,
            folders.len(),
            files.len()
        );
        Ok(FolderOutcome::Completed(FolderDeletionDto {
            folders_deleted: folders.len(),
            files_deleted: files.len(),
        }))
    }

    async fn has_sibling_named(
        &self,
        parent_id: Option<Uuid>,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<bool> {
        let siblings = self.repository.get_folders_by_parent(parent_id).await?;
        Ok(siblings
            .iter()
            .any(|s| Some(s.id) != except && s.name.eq_ignore_ascii_case(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_helpers::TestContext;

    fn completed<T>(outcome: FolderOutcome<T>) -> T {
        match outcome {
            FolderOutcome::Completed(value) => value,
            FolderOutcome::Rejected(r) => panic!("unexpected rejection: {}", r),
        }
    }

    fn rejection<T: fmt::Debug>(outcome: FolderOutcome<T>) -> FolderRejection {
        match outcome {
            FolderOutcome::Rejected(r) => r,
            FolderOutcome::Completed(v) => panic!("expected rejection, got {:?}", v),
        }
    }

    #[tokio::test]
    async fn test_rename_cascades_to_descendants_and_files() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let x = ctx.create_folder("x", None).await;
        let a = ctx.create_folder("A", Some(&x)).await;
        let b = ctx.create_folder("B", Some(&a)).await;
        let f = ctx.ingest_into("f.txt", b"file in B", &b).await;
        let sibling = ctx.create_folder("AB", Some(&x)).await;

        let renamed = completed(service.rename(a.id, "A2").await.unwrap());

        assert_eq!(renamed.path, join_location(&x.path, "A2"));
        let b_after = service.get(b.id).await.unwrap();
        assert_eq!(b_after.path, join_location(&join_location(&x.path, "A2"), "B"));
        let f_after = ctx.repository.find_file(f).await.unwrap().unwrap();
        assert_eq!(f_after.path, join_location(&b_after.path, "f.txt"));
        assert!(std::path::Path::new(&f_after.path).is_file());
        assert_eq!(service.get(sibling.id).await.unwrap().path, sibling.path);
    }

    #[tokio::test]
    async fn test_rename_rejects_sibling_collision() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let docs = ctx.create_folder("Docs", None).await;
        ctx.create_folder("Music", None).await;

        let outcome = service.rename(docs.id, "music").await.unwrap();

        assert_eq!(
            rejection(outcome),
            FolderRejection::NameCollision("music".to_string())
        );
        assert_eq!(service.get(docs.id).await.unwrap().name, "Docs");
    }

    #[tokio::test]
    async fn test_create_validates_names() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();

        let invalid = service.create("a/b", None).await.unwrap();
        let reserved = service.create("default", None).await.unwrap();
        let created = completed(service.create("  Projects ", None).await.unwrap());
        let duplicate = service.create("PROJECTS", None).await.unwrap();

        assert!(matches!(rejection(invalid), FolderRejection::InvalidName(_)));
        assert!(matches!(rejection(reserved), FolderRejection::NameCollision(_)));
        assert_eq!(created.name, "Projects");
        assert!(std::path::Path::new(&created.path).is_dir());
        assert!(matches!(rejection(duplicate), FolderRejection::NameCollision(_)));
    }

    #[tokio::test]
    async fn test_default_folder_is_protected_even_with_cascade() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let default = ctx.resolver.bootstrap().await.unwrap();

        for cascade in [false, true] {
            let outcome = service.delete(default.id, cascade).await.unwrap();
            assert_eq!(rejection(outcome), FolderRejection::DefaultFolderProtected);
        }

        let renamed = completed(service.rename(default.id, "Inbox").await.unwrap());
        let outcome = service.delete(renamed.id, true).await.unwrap();
        assert_eq!(rejection(outcome), FolderRejection::DefaultFolderProtected);
    }

    #[tokio::test]
    async fn test_protection_heuristics_for_unflagged_roots() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let expected = ctx.resolver.expected_default_location();
        let archive = ctx.create_folder("Archive", None).await;
        let mut folder = archive.clone();

        assert!(!service.is_protected(&folder));

        folder.name = "DEFAULT".to_string();
        assert!(service.is_protected(&folder));

        folder.name = "Legacy".to_string();
        folder.path = format!("{}/", expected);
        assert!(service.is_protected(&folder));

        folder.path = "/mnt/old/Default".to_string();
        assert!(service.is_protected(&folder));

        let nested = ctx.create_folder("Default", Some(&archive)).await;
        assert!(!service.is_protected(&nested));
    }

    #[tokio::test]
    async fn test_delete_non_empty_requires_cascade() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let docs = ctx.create_folder("Docs", None).await;
        ctx.create_folder("Taxes", Some(&docs)).await;

        let outcome = service.delete(docs.id, false).await.unwrap();

        assert_eq!(
            rejection(outcome),
            FolderRejection::NotEmpty {
                folders: 1,
                files: 0
            }
        );
    }

    #[tokio::test]
    async fn test_cascade_delete_removes_everything_below() {
        let ctx = TestContext::new();
        let service = ctx.folder_service();
        let docs = ctx.create_folder("Docs", None).await;
        let taxes = ctx.create_folder("Taxes", Some(&docs)).await;
        let y2024 = ctx.create_folder("2024", Some(&taxes)).await;
        let top = ctx.ingest_into("readme.txt", b"top level", &docs).await;
        let deep = ctx.ingest_into("return.txt", b"deep down", &y2024).await;
        let deep_path = ctx.repository.find_file(deep).await.unwrap().unwrap().path;

        let deletion = completed(service.delete(docs.id, true).await.unwrap());

        assert_eq!(
            deletion,
            FolderDeletionDto {
                folders_deleted: 3,
                files_deleted: 2
            }
        );
        assert!(ctx.repository.find_file(top).await.unwrap().is_none());
        assert!(ctx.repository.list_folders().await.unwrap().is_empty());
        assert!(!std::path::Path::new(&deep_path).exists());
        assert!(!std::path::Path::new(&docs.path).exists());
    }

    #[tokio::test]
    async fn test_rejection_renders_failure_envelope() {
        let response = FolderRejection::DefaultFolderProtected.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = FolderRejection::InvalidName("..".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
