use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    CatalogRepository, ChangeSet, FileQuery, RepoResult, FILES_ACTIVE_HASH_KEY,
    FOLDERS_PARENT_NAME_KEY, FOLDERS_SINGLE_DEFAULT_KEY,
};
use crate::core::error::PersistenceError;
use crate::features::files::models::{FileRecord, NewFileRecord};
use crate::features::folders::models::{FolderRecord, NewFolderRecord};

#[derive(Debug, Default, Clone)]
struct CatalogState {
    files: Vec<FileRecord>,
    folders: Vec<FolderRecord>,
}

impl CatalogState {
    fn check_file_constraints(&self) -> RepoResult<()> {
        let active: Vec<&FileRecord> = self.files.iter().filter(|f| f.is_active).collect();
        for (i, file) in active.iter().enumerate() {
            if active[i + 1..]
                .iter()
                .any(|other| other.content_hash == file.content_hash)
            {
                return Err(violation(FILES_ACTIVE_HASH_KEY));
            }
        }
        Ok(())
    }

    fn check_folder_constraints(&self) -> RepoResult<()> {
        if self.folders.iter().filter(|f| f.is_default).count() > 1 {
            return Err(violation(FOLDERS_SINGLE_DEFAULT_KEY));
        }
        for (i, folder) in self.folders.iter().enumerate() {
            if self.folders[i + 1..].iter().any(|other| {
                other.parent_id == folder.parent_id && other.name.eq_ignore_ascii_case(&folder.name)
            }) {
                return Err(violation(FOLDERS_PARENT_NAME_KEY));
            }
        }
        Ok(())
    }
}

fn violation(constraint: &str) -> PersistenceError {
    PersistenceError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

/// Catalog kept in process memory, enforcing the same unique indexes as PostgreSQL
#[derive(Debug, Default)]
pub struct InMemoryCatalogRepository {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CatalogState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Every stored file row, including soft-deleted ones
    pub fn all_files(&self) -> Vec<FileRecord> {
        self.with_state(|s| s.files.clone())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn find_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        Ok(self.with_state(|s| {
            s.files
                .iter()
                .find(|f| f.id == id && f.is_active)
                .cloned()
        }))
    }

    async fn find_file_by_path(&self, path: &str) -> RepoResult<Option<FileRecord>> {
        Ok(self.with_state(|s| {
            s.files
                .iter()
                .find(|f| {
                    f.is_active && (f.path == path || f.source_path.as_deref() == Some(path))
                })
                .cloned()
        }))
    }

    async fn find_file_by_hash(&self, hash: &[u8]) -> RepoResult<Option<FileRecord>> {
        Ok(self.with_state(|s| {
            s.files
                .iter()
                .find(|f| f.is_active && f.content_hash == hash)
                .cloned()
        }))
    }

    async fn add_file(&self, file: NewFileRecord) -> RepoResult<FileRecord> {
        self.with_state(|s| {
            if s.files
                .iter()
                .any(|f| f.is_active && f.content_hash == file.content_hash)
            {
                return Err(violation(FILES_ACTIVE_HASH_KEY));
            }
            let record = FileRecord::from_new(Uuid::now_v7(), file, Utc::now());
            s.files.push(record.clone());
            Ok(record)
        })
    }

    async fn update_file(&self, file: &FileRecord) -> RepoResult<()> {
        self.save_changes(ChangeSet {
            file_updates: vec![file.clone()],
            ..ChangeSet::default()
        })
        .await
    }

    async fn delete_file(&self, id: Uuid) -> RepoResult<()> {
        self.with_state(|s| s.files.retain(|f| f.id != id));
        Ok(())
    }

    async fn list_files(&self, query: &FileQuery) -> RepoResult<(Vec<FileRecord>, i64)> {
        let search = query.search.as_ref().map(|s| s.to_lowercase());
        let mut matches: Vec<FileRecord> = self.with_state(|s| {
            s.files
                .iter()
                .filter(|f| f.is_active)
                .filter(|f| query.folder_id.map_or(true, |id| f.folder_id == id))
                .filter(|f| {
                    search
                        .as_ref()
                        .map_or(true, |needle| f.original_name.to_lowercase().contains(needle))
                })
                .filter(|f| query.tag.as_ref().map_or(true, |tag| f.tags.contains(tag)))
                .filter(|f| query.is_photo.map_or(true, |p| f.is_photo == p))
                .cloned()
                .collect()
        });
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matches.len() as i64;
        let page = matches
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_files_in_folder(
        &self,
        folder_id: Uuid,
        include_inactive: bool,
    ) -> RepoResult<Vec<FileRecord>> {
        Ok(self.with_state(|s| {
            s.files
                .iter()
                .filter(|f| f.folder_id == folder_id && (include_inactive || f.is_active))
                .cloned()
                .collect()
        }))
    }

    async fn get_folder(&self, id: Uuid) -> RepoResult<Option<FolderRecord>> {
        Ok(self.with_state(|s| s.folders.iter().find(|f| f.id == id).cloned()))
    }

    async fn get_folders_by_parent(
        &self,
        parent_id: Option<Uuid>,
    ) -> RepoResult<Vec<FolderRecord>> {
        Ok(self.with_state(|s| {
            let mut children: Vec<FolderRecord> = s
                .folders
                .iter()
                .filter(|f| f.parent_id == parent_id)
                .cloned()
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            children
        }))
    }

    async fn find_default_folder(&self) -> RepoResult<Option<FolderRecord>> {
        Ok(self.with_state(|s| s.folders.iter().find(|f| f.is_default).cloned()))
    }

    async fn add_folder(&self, folder: NewFolderRecord) -> RepoResult<FolderRecord> {
        self.with_state(|s| {
            let record = FolderRecord::from_new(Uuid::now_v7(), folder, Utc::now());
            s.folders.push(record.clone());
            if let Err(e) = s.check_folder_constraints() {
                s.folders.pop();
                return Err(e);
            }
            Ok(record)
        })
    }

    async fn list_folders(&self) -> RepoResult<Vec<FolderRecord>> {
        Ok(self.with_state(|s| {
            let mut folders = s.folders.clone();
            folders.sort_by(|a, b| a.path.cmp(&b.path));
            folders
        }))
    }

    async fn save_changes(&self, changes: ChangeSet) -> RepoResult<()> {
        self.with_state(|s| {
            let mut next = s.clone();
            let now = Utc::now();

            for folder in changes.folder_updates {
                if let Some(existing) = next.folders.iter_mut().find(|f| f.id == folder.id) {
                    existing.path = folder.path;
                    existing.name = folder.name;
                    existing.parent_id = folder.parent_id;
                    existing.updated_at = now;
                }
            }

            for file in changes.file_updates {
                if let Some(existing) = next.files.iter_mut().find(|f| f.id == file.id) {
                    existing.path = file.path;
                    existing.original_name = file.original_name;
                    existing.folder_id = file.folder_id;
                    existing.tags = file.tags;
                    existing.is_active = file.is_active;
                    existing.size_bytes = file.size_bytes;
                    existing.is_compressed = file.is_compressed;
                    existing.updated_at = now;
                }
            }

            next.files.retain(|f| !changes.file_deletes.contains(&f.id));

            // Mirrors ON DELETE CASCADE on files.folder_id
            next.folders
                .retain(|f| !changes.folder_deletes.contains(&f.id));
            next.files
                .retain(|f| !changes.folder_deletes.contains(&f.folder_id));

            next.check_file_constraints()?;
            next.check_folder_constraints()?;

            *s = next;
            Ok(())
        })
    }
}
