use utoipa::{Modify, OpenApi};

use crate::core::error::DuplicateContentDto;
use crate::features::files::{dtos as files_dtos, handlers as files_handlers};
use crate::features::folders::{dtos as folders_dtos, handlers as folders_handlers};
use crate::shared::types::{ApiResponse, Meta};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Ingestion
        files_handlers::upload_file,
        files_handlers::import_file,
        // Files
        files_handlers::list_files,
        files_handlers::get_file,
        files_handlers::get_file_content,
        files_handlers::get_thumbnail,
        files_handlers::verify_file,
        files_handlers::rename_file,
        files_handlers::move_file,
        files_handlers::update_tags,
        files_handlers::delete_file,
        // Folders
        folders_handlers::create_folder,
        folders_handlers::list_folders,
        folders_handlers::get_folder_tree,
        folders_handlers::get_folder,
        folders_handlers::rename_folder,
        folders_handlers::delete_folder,
    ),
    components(
        schemas(
            // Shared
            Meta,
            DuplicateContentDto,
            ApiResponse<DuplicateContentDto>,
            // Files
            files_dtos::UploadFileDto,
            files_dtos::ImportFileDto,
            files_dtos::IngestResultDto,
            files_dtos::PhotoMetadataDto,
            files_dtos::FileResponseDto,
            files_dtos::ThumbnailDto,
            files_dtos::VerifyFileDto,
            files_dtos::RenameFileDto,
            files_dtos::MoveFileDto,
            files_dtos::UpdateTagsDto,
            files_dtos::DeleteFileResponseDto,
            ApiResponse<files_dtos::IngestResultDto>,
            ApiResponse<files_dtos::FileResponseDto>,
            ApiResponse<Vec<files_dtos::FileResponseDto>>,
            ApiResponse<files_dtos::ThumbnailDto>,
            ApiResponse<files_dtos::VerifyFileDto>,
            ApiResponse<files_dtos::DeleteFileResponseDto>,
            // Folders
            folders_dtos::CreateFolderDto,
            folders_dtos::RenameFolderDto,
            folders_dtos::FolderResponseDto,
            folders_dtos::FolderTreeDto,
            folders_dtos::FolderDeletionDto,
            ApiResponse<folders_dtos::FolderResponseDto>,
            ApiResponse<Vec<folders_dtos::FolderResponseDto>>,
            ApiResponse<Vec<folders_dtos::FolderTreeDto>>,
            ApiResponse<folders_dtos::FolderDeletionDto>,
        )
    ),
    tags(
        (name = "files", description = "File ingestion, retrieval and management"),
        (name = "folders", description = "Folder hierarchy and the default destination folder"),
    ),
    info(
        title = "Filebase API",
        version = "0.1.0",
        description = "API documentation for Filebase",
    )
)]
pub struct ApiDoc;

/// Modifier to override OpenAPI info from config
pub struct SwaggerInfoModifier {
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Modify for SwaggerInfoModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = self.title.clone();
        openapi.info.version = self.version.clone();
        openapi.info.description = Some(self.description.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();

        for path in [
            "/api/files/upload",
            "/api/files/import",
            "/api/files",
            "/api/files/{id}",
            "/api/files/{id}/content",
            "/api/files/{id}/thumbnail",
            "/api/files/{id}/verify",
            "/api/files/{id}/move",
            "/api/files/{id}/tags",
            "/api/folders",
            "/api/folders/tree",
            "/api/folders/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn test_info_modifier_overrides_defaults() {
        let mut doc = ApiDoc::openapi();

        SwaggerInfoModifier {
            title: "Archive".to_string(),
            version: "2.0.0".to_string(),
            description: "Household archive".to_string(),
        }
        .modify(&mut doc);

        assert_eq!(doc.info.title, "Archive");
        assert_eq!(doc.info.version, "2.0.0");
        assert_eq!(doc.info.description.as_deref(), Some("Household archive"));
    }
}
