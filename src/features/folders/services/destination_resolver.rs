use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::folders::models::{FolderRecord, NewFolderRecord};
use crate::modules::persistence::{
    CatalogRepository, FOLDERS_PARENT_NAME_KEY, FOLDERS_SINGLE_DEFAULT_KEY,
};
use crate::modules::storage::StorageBackend;
use crate::shared::constants::DEFAULT_FOLDER_NAME;

/// Picks the folder an ingested file lands in
pub struct DestinationResolver {
    repository: Arc<dyn CatalogRepository>,
    storage: Arc<dyn StorageBackend>,
    /// Serializes default-folder creation inside this process
    default_lock: Mutex<()>,
}

impl DestinationResolver {
    pub fn new(repository: Arc<dyn CatalogRepository>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            repository,
            storage,
            default_lock: Mutex::new(()),
        }
    }

    /// The requested folder, or the default folder when none was given or it
    /// no longer exists
    pub async fn resolve(&self, folder_id: Option<Uuid>) -> Result<FolderRecord> {
        if let Some(id) = folder_id {
            if let Some(folder) = self.repository.get_folder(id).await? {
                return Ok(folder);
            }
            warn!("Folder {} not found, falling back to the default folder", id);
        }
        self.default_folder().await
    }

    /// Location the default folder is created at
    pub fn expected_default_location(&self) -> String {
        self.storage.folder_location(DEFAULT_FOLDER_NAME)
    }

    /// Get or create the single default folder
    pub async fn default_folder(&self) -> Result<FolderRecord> {
        if let Some(folder) = self.repository.find_default_folder().await? {
            return Ok(folder);
        }

        let _guard = self.default_lock.lock().await;

        // Another task may have created it while we waited
        if let Some(folder) = self.repository.find_default_folder().await? {
            return Ok(folder);
        }

        let created = self
            .repository
            .add_folder(NewFolderRecord {
                path: self.expected_default_location(),
                name: DEFAULT_FOLDER_NAME.to_string(),
                parent_id: None,
                is_default: true,
            })
            .await;

        match created {
            Ok(folder) => {
                info!("Created default folder {} at {}", folder.id, folder.path);
                Ok(folder)
            }
            // Lost the race to another process; either index may report it
            Err(e) if e.violates(FOLDERS_SINGLE_DEFAULT_KEY) || e.violates(FOLDERS_PARENT_NAME_KEY) => {
                self.repository.find_default_folder().await?.ok_or_else(|| {
                    AppError::Conflict(format!(
                        "A root folder named '{}' exists but is not marked as the default folder",
                        DEFAULT_FOLDER_NAME
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure the default folder exists in the catalog and in storage
    pub async fn bootstrap(&self) -> Result<FolderRecord> {
        let folder = self.default_folder().await?;
        self.storage.ensure_folder(&folder.path).await?;
        Ok(folder)
    }
}
