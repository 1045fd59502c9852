use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::features::folders::models::FolderRecord;

/// Response DTO for folder
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FolderResponseDto {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub parent_id: Option<Uuid>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FolderRecord> for FolderResponseDto {
    fn from(f: FolderRecord) -> Self {
        Self {
            id: f.id,
            name: f.name,
            path: f.path,
            parent_id: f.parent_id,
            is_default: f.is_default,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }
}

/// Response DTO for the folder tree
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(no_recursion)]
pub struct FolderTreeDto {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub is_default: bool,
    pub children: Vec<FolderTreeDto>,
}

impl FolderTreeDto {
    /// Build tree from flat list of folders
    pub fn build_tree(folders: Vec<FolderRecord>) -> Vec<FolderTreeDto> {
        let mut children: HashMap<Option<Uuid>, Vec<&FolderRecord>> = HashMap::new();
        for folder in &folders {
            children.entry(folder.parent_id).or_default().push(folder);
        }

        children
            .get(&None)
            .map(|roots| {
                roots
                    .iter()
                    .map(|root| Self::build_node(root, &children))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn build_node(
        folder: &FolderRecord,
        children: &HashMap<Option<Uuid>, Vec<&FolderRecord>>,
    ) -> FolderTreeDto {
        let nodes = children
            .get(&Some(folder.id))
            .map(|kids| {
                kids.iter()
                    .map(|child| Self::build_node(child, children))
                    .collect()
            })
            .unwrap_or_default();

        FolderTreeDto {
            id: folder.id,
            name: folder.name.clone(),
            path: folder.path.clone(),
            is_default: folder.is_default,
            children: nodes,
        }
    }
}

/// Request DTO for creating a folder
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateFolderDto {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    /// Parent folder; omitted for a root folder
    pub parent_id: Option<Uuid>,
}

/// Request DTO for renaming a folder
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RenameFolderDto {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
}

/// Query params for listing folders
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListFoldersQuery {
    /// Parent folder whose children to list; roots when omitted
    pub parent_id: Option<Uuid>,
}

/// Query params for deleting a folder
#[derive(Debug, Deserialize, IntoParams)]
pub struct DeleteFolderQuery {
    /// Delete subfolders and files as well
    #[serde(default)]
    pub cascade: bool,
}

/// What a folder delete removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FolderDeletionDto {
    pub folders_deleted: usize,
    pub files_deleted: usize,
}
