use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::core::error::{AppError, Result};
use crate::core::extractor::{AppJson, AppQuery};
use crate::features::folders::dtos::{
    CreateFolderDto, DeleteFolderQuery, FolderDeletionDto, FolderResponseDto, FolderTreeDto,
    ListFoldersQuery, RenameFolderDto,
};
use crate::features::folders::services::{FolderOutcome, FolderService};
use crate::shared::types::{ApiResponse, Meta};

fn render<T, D>(outcome: FolderOutcome<T>, status: StatusCode, message: &str) -> Response
where
    D: From<T> + serde::Serialize,
{
    match outcome {
        FolderOutcome::Completed(value) => (
            status,
            Json(ApiResponse::success(
                Some(D::from(value)),
                Some(message.to_string()),
                None,
            )),
        )
            .into_response(),
        FolderOutcome::Rejected(rejection) => rejection.into_response(),
    }
}

/// Create a folder
#[utoipa::path(
    post,
    path = "/api/folders",
    request_body = CreateFolderDto,
    responses(
        (status = 201, description = "Folder created", body = ApiResponse<FolderResponseDto>),
        (status = 400, description = "Invalid name"),
        (status = 404, description = "Parent folder not found"),
        (status = 409, description = "A sibling with the same name exists")
    ),
    tag = "folders"
)]
pub async fn create_folder(
    State(service): State<Arc<FolderService>>,
    AppJson(dto): AppJson<CreateFolderDto>,
) -> Result<Response> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = service.create(&dto.name, dto.parent_id).await?;
    Ok(render::<_, FolderResponseDto>(
        outcome,
        StatusCode::CREATED,
        "Folder created successfully",
    ))
}

/// List child folders
///
/// Returns root folders when `parent_id` is omitted.
#[utoipa::path(
    get,
    path = "/api/folders",
    params(ListFoldersQuery),
    responses(
        (status = 200, description = "Child folders", body = ApiResponse<Vec<FolderResponseDto>>),
        (status = 404, description = "Parent folder not found")
    ),
    tag = "folders"
)]
pub async fn list_folders(
    State(service): State<Arc<FolderService>>,
    AppQuery(query): AppQuery<ListFoldersQuery>,
) -> Result<Json<ApiResponse<Vec<FolderResponseDto>>>> {
    let folders: Vec<FolderResponseDto> = service
        .list_children(query.parent_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    let total = folders.len() as i64;
    Ok(Json(ApiResponse::success(
        Some(folders),
        None,
        Some(Meta { total }),
    )))
}

/// Full folder tree
#[utoipa::path(
    get,
    path = "/api/folders/tree",
    responses(
        (status = 200, description = "Folder tree", body = ApiResponse<Vec<FolderTreeDto>>),
    ),
    tag = "folders"
)]
pub async fn get_folder_tree(
    State(service): State<Arc<FolderService>>,
) -> Result<Json<ApiResponse<Vec<FolderTreeDto>>>> {
    let tree = service.tree().await?;
    Ok(Json(ApiResponse::success(Some(tree), None, None)))
}

/// Get folder by ID
#[utoipa::path(
    get,
    path = "/api/folders/{id}",
    params(
        ("id" = Uuid, Path, description = "Folder ID")
    ),
    responses(
        (status = 200, description = "Folder found", body = ApiResponse<FolderResponseDto>),
        (status = 404, description = "Folder not found")
    ),
    tag = "folders"
)]
pub async fn get_folder(
    State(service): State<Arc<FolderService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FolderResponseDto>>> {
    let folder = service.get(id).await?;
    Ok(Json(ApiResponse::success(Some(folder.into()), None, None)))
}

/// Rename a folder
///
/// Paths of all subfolders and contained files follow the new name.
#[utoipa::path(
    patch,
    path = "/api/folders/{id}",
    params(
        ("id" = Uuid, Path, description = "Folder ID")
    ),
    request_body = RenameFolderDto,
    responses(
        (status = 200, description = "Folder renamed", body = ApiResponse<FolderResponseDto>),
        (status = 400, description = "Invalid name"),
        (status = 404, description = "Folder not found"),
        (status = 409, description = "A sibling with the same name exists")
    ),
    tag = "folders"
)]
pub async fn rename_folder(
    State(service): State<Arc<FolderService>>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<RenameFolderDto>,
) -> Result<Response> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = service.rename(id, &dto.name).await?;
    Ok(render::<_, FolderResponseDto>(
        outcome,
        StatusCode::OK,
        "Folder renamed successfully",
    ))
}

/// Delete a folder
///
/// Non-empty folders need `cascade=true`. The default folder is never deleted.
#[utoipa::path(
    delete,
    path = "/api/folders/{id}",
    params(
        ("id" = Uuid, Path, description = "Folder ID"),
        DeleteFolderQuery
    ),
    responses(
        (status = 200, description = "Folder deleted", body = ApiResponse<FolderDeletionDto>),
        (status = 404, description = "Folder not found"),
        (status = 409, description = "Folder is protected or not empty")
    ),
    tag = "folders"
)]
pub async fn delete_folder(
    State(service): State<Arc<FolderService>>,
    Path(id): Path<Uuid>,
    AppQuery(query): AppQuery<DeleteFolderQuery>,
) -> Result<Response> {
    let outcome = service.delete(id, query.cascade).await?;
    Ok(render::<_, FolderDeletionDto>(
        outcome,
        StatusCode::OK,
        "Folder deleted successfully",
    ))
}

#[cfg(test)]
mod tests {
    use crate::features::folders::routes;
    use crate::shared::test_helpers::TestContext;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn server(ctx: &TestContext) -> TestServer {
        TestServer::new(routes::routes(Arc::new(ctx.folder_service()))).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_fetch_folder() {
        let ctx = TestContext::new();
        let server = server(&ctx);

        let response = server
            .post("/api/folders")
            .json(&json!({ "name": "Receipts" }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let body: Value = response.json();
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let response = server.get(&format!("/api/folders/{}", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["name"], "Receipts");
        assert_eq!(body["data"]["is_default"], false);
    }

    #[tokio::test]
    async fn test_deleting_default_folder_returns_failure_envelope() {
        let ctx = TestContext::new();
        let default = ctx.resolver.bootstrap().await.unwrap();
        let server = server(&ctx);

        let response = server
            .delete(&format!("/api/folders/{}", default.id))
            .add_query_param("cascade", "true")
            .await;

        response.assert_status(axum::http::StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "The default folder cannot be deleted");
    }

    #[tokio::test]
    async fn test_tree_lists_nested_folders() {
        let ctx = TestContext::new();
        let docs = ctx.create_folder("Docs", None).await;
        ctx.create_folder("Taxes", Some(&docs)).await;
        let server = server(&ctx);

        let response = server.get("/api/folders/tree").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"][0]["name"], "Docs");
        assert_eq!(body["data"][0]["children"][0]["name"], "Taxes");
    }

    #[tokio::test]
    async fn test_unknown_folder_is_not_found() {
        let ctx = TestContext::new();
        let server = server(&ctx);

        let response = server
            .get(&format!("/api/folders/{}", uuid::Uuid::now_v7()))
            .await;

        response.assert_status_not_found();
    }
}
