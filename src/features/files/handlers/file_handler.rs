use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::core::error::{AppError, Result};
use crate::core::extractor::{AppJson, AppQuery};
use crate::features::files::dtos::{
    DeleteFileQuery, DeleteFileResponseDto, FileResponseDto, ListFilesQuery, MoveFileDto,
    RenameFileDto, ThumbnailDto, ThumbnailQuery, UpdateTagsDto, VerifyFileDto,
};
use crate::features::files::services::FileService;
use crate::shared::types::{ApiResponse, Meta, PaginationQuery};

/// List files
///
/// Filters combine; results are newest first.
#[utoipa::path(
    get,
    path = "/api/files",
    params(ListFilesQuery, PaginationQuery),
    responses(
        (status = 200, description = "Matching files", body = ApiResponse<Vec<FileResponseDto>>)
    ),
    tag = "files"
)]
pub async fn list_files(
    State(service): State<Arc<FileService>>,
    AppQuery(query): AppQuery<ListFilesQuery>,
    AppQuery(pagination): AppQuery<PaginationQuery>,
) -> Result<Json<ApiResponse<Vec<FileResponseDto>>>> {
    let (files, total) = service.list(query, &pagination).await?;
    Ok(Json(ApiResponse::success(
        Some(files),
        None,
        Some(Meta { total }),
    )))
}

/// Get file by ID
#[utoipa::path(
    get,
    path = "/api/files/{id}",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "File found", body = ApiResponse<FileResponseDto>),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn get_file(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<FileResponseDto>>> {
    let file = service.get(id).await?;
    Ok(Json(ApiResponse::success(Some(file), None, None)))
}

/// Download file content
///
/// Compressed files are inflated before they are sent.
#[utoipa::path(
    get,
    path = "/api/files/{id}/content",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Raw file bytes", content_type = "application/octet-stream"),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn get_file_content(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let content = service.content(id).await?;
    let disposition = format!(
        "inline; filename*=UTF-8''{}",
        urlencoding::encode(&content.name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, content.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content.bytes,
    )
        .into_response())
}

/// Get a thumbnail reference for a photo
#[utoipa::path(
    get,
    path = "/api/files/{id}/thumbnail",
    params(
        ("id" = Uuid, Path, description = "File ID"),
        ThumbnailQuery
    ),
    responses(
        (status = 200, description = "Thumbnail reference", body = ApiResponse<ThumbnailDto>),
        (status = 404, description = "File not found"),
        (status = 422, description = "File is not a photo")
    ),
    tag = "files"
)]
pub async fn get_thumbnail(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
    AppQuery(query): AppQuery<ThumbnailQuery>,
) -> Result<Json<ApiResponse<ThumbnailDto>>> {
    let thumbnail = service
        .thumbnail(id, query.max_width, query.max_height)
        .await?;
    Ok(Json(ApiResponse::success(Some(thumbnail), None, None)))
}

/// Verify stored content against the recorded digest
#[utoipa::path(
    get,
    path = "/api/files/{id}/verify",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Verification result", body = ApiResponse<VerifyFileDto>),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn verify_file(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<VerifyFileDto>>> {
    let result = service.verify(id).await?;
    Ok(Json(ApiResponse::success(Some(result), None, None)))
}

/// Rename a file
///
/// Only the display name changes; the stored location is kept.
#[utoipa::path(
    patch,
    path = "/api/files/{id}",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    request_body = RenameFileDto,
    responses(
        (status = 200, description = "File renamed", body = ApiResponse<FileResponseDto>),
        (status = 400, description = "Invalid name"),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn rename_file(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<RenameFileDto>,
) -> Result<Json<ApiResponse<FileResponseDto>>> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let file = service.rename(id, &dto.name).await?;
    Ok(Json(ApiResponse::success(
        Some(file),
        Some("File renamed successfully".to_string()),
        None,
    )))
}

/// Move a file to another folder
#[utoipa::path(
    post,
    path = "/api/files/{id}/move",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    request_body = MoveFileDto,
    responses(
        (status = 200, description = "File moved", body = ApiResponse<FileResponseDto>),
        (status = 404, description = "File or folder not found")
    ),
    tag = "files"
)]
pub async fn move_file(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<MoveFileDto>,
) -> Result<Json<ApiResponse<FileResponseDto>>> {
    let file = service.move_to(id, dto.folder_id).await?;
    Ok(Json(ApiResponse::success(
        Some(file),
        Some("File moved successfully".to_string()),
        None,
    )))
}

/// Replace the tags of a file
#[utoipa::path(
    put,
    path = "/api/files/{id}/tags",
    params(
        ("id" = Uuid, Path, description = "File ID")
    ),
    request_body = UpdateTagsDto,
    responses(
        (status = 200, description = "Tags updated", body = ApiResponse<FileResponseDto>),
        (status = 400, description = "Too many tags"),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn update_tags(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<UpdateTagsDto>,
) -> Result<Json<ApiResponse<FileResponseDto>>> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let file = service.set_tags(id, &dto.tags).await?;
    Ok(Json(ApiResponse::success(Some(file), None, None)))
}

/// Delete a file
///
/// Hides the file by default. With `permanent=true` the record and stored bytes are removed.
#[utoipa::path(
    delete,
    path = "/api/files/{id}",
    params(
        ("id" = Uuid, Path, description = "File ID"),
        DeleteFileQuery
    ),
    responses(
        (status = 200, description = "File deleted", body = ApiResponse<DeleteFileResponseDto>),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn delete_file(
    State(service): State<Arc<FileService>>,
    Path(id): Path<Uuid>,
    AppQuery(query): AppQuery<DeleteFileQuery>,
) -> Result<Json<ApiResponse<DeleteFileResponseDto>>> {
    service.delete(id, query.permanent).await?;
    Ok(Json(ApiResponse::success(
        Some(DeleteFileResponseDto {
            deleted: true,
            permanent: query.permanent,
        }),
        Some("File deleted successfully".to_string()),
        None,
    )))
}

#[cfg(test)]
mod tests {
    use crate::features::files::routes;
    use crate::features::files::services::UploadPipeline;
    use crate::shared::test_helpers::TestContext;
    use axum::http::{header, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn server(ctx: &TestContext) -> TestServer {
        let pipeline = UploadPipeline::with_defaults(Arc::new(ctx.ingestion_service()), 1 << 20);
        TestServer::new(routes::routes(
            Arc::new(ctx.file_service()),
            Arc::new(pipeline),
            1 << 20,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_and_download_file() {
        let ctx = TestContext::new();
        let id = ctx.ingest("hello world.txt", b"hello").await;
        let server = server(&ctx);

        let response = server.get(&format!("/api/files/{}", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["name"], "hello world.txt");
        assert_eq!(body["data"]["is_photo"], false);
        assert!(body["data"]["photo"].is_null());

        let response = server.get(&format!("/api/files/{}/content", id)).await;
        response.assert_status_ok();
        assert_eq!(response.as_bytes().as_ref(), b"hello");
        assert_eq!(response.header(header::CONTENT_TYPE), "text/plain");
        assert_eq!(
            response.header(header::CONTENT_DISPOSITION),
            "inline; filename*=UTF-8''hello%20world.txt"
        );
    }

    #[tokio::test]
    async fn test_list_reports_total() {
        let ctx = TestContext::new();
        ctx.ingest("a.txt", b"a").await;
        ctx.ingest("b.txt", b"b").await;
        ctx.ingest("c.txt", b"c").await;
        let server = server(&ctx);

        let response = server
            .get("/api/files")
            .add_query_param("page_size", 2)
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["meta"]["total"], 3);
    }

    #[tokio::test]
    async fn test_tags_are_normalized() {
        let ctx = TestContext::new();
        let id = ctx.ingest("trip.txt", b"itinerary").await;
        let server = server(&ctx);

        let response = server
            .put(&format!("/api/files/{}/tags", id))
            .json(&json!({ "tags": ["Travel", " travel ", "", "Family"] }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["tags"], json!(["travel", "family"]));
    }

    #[tokio::test]
    async fn test_thumbnail_of_document_is_unprocessable() {
        let ctx = TestContext::new();
        let id = ctx.ingest("doc.txt", b"not an image").await;
        let server = server(&ctx);

        let response = server.get(&format!("/api/files/{}/thumbnail", id)).await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_verify_and_delete() {
        let ctx = TestContext::new();
        let id = ctx.ingest("keep.txt", b"keep me").await;
        let server = server(&ctx);

        let response = server.get(&format!("/api/files/{}/verify", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["matches"], true);

        let response = server.delete(&format!("/api/files/{}", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["permanent"], false);

        server
            .get(&format!("/api/files/{}", id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_move_to_missing_folder_is_not_found() {
        let ctx = TestContext::new();
        let id = ctx.ingest("memo.txt", b"memo").await;
        let server = server(&ctx);

        let response = server
            .post(&format!("/api/files/{}/move", id))
            .json(&json!({ "folder_id": uuid::Uuid::now_v7() }))
            .await;

        response.assert_status_not_found();
    }
}
