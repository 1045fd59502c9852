use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::core::error::{AppError, DuplicateContentDto, Result};
use crate::core::extractor::AppJson;
use crate::features::files::dtos::{ImportFileDto, IngestResultDto, UploadFileDto};
use crate::features::files::services::{IngestRequest, UploadPipeline};
use crate::shared::types::ApiResponse;

/// Last path segment of a client supplied file name
fn client_file_name(raw: &str) -> String {
    raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("").trim().to_string()
}

fn ingest_response(result: IngestResultDto) -> Response {
    if result.is_duplicate {
        (
            StatusCode::OK,
            Json(ApiResponse::success(
                Some(result),
                Some("File was already ingested".to_string()),
                None,
            )),
        )
            .into_response()
    } else {
        (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                Some(result),
                Some("File ingested successfully".to_string()),
                None,
            )),
        )
            .into_response()
    }
}

/// Upload a file
///
/// Accepts multipart/form-data with:
/// - `file`: The file to upload (required)
/// - `folder_id`: Destination folder (optional, defaults to the default folder)
#[utoipa::path(
    post,
    path = "/api/files/upload",
    tag = "files",
    request_body(
        content = UploadFileDto,
        content_type = "multipart/form-data",
        description = "File upload form with an optional destination folder",
    ),
    responses(
        (status = 201, description = "File ingested", body = ApiResponse<IngestResultDto>),
        (status = 400, description = "Invalid file or validation error"),
        (status = 409, description = "Identical content already exists", body = ApiResponse<DuplicateContentDto>),
        (status = 413, description = "File too large")
    )
)]
pub async fn upload_file(
    State(pipeline): State<Arc<UploadPipeline>>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut spooled: Option<(NamedTempFile, String)> = None;
    let mut folder_id: Option<Uuid> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        debug!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read multipart data: {}", e))
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let name = field
                    .file_name()
                    .map(client_file_name)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "unnamed".to_string());

                // Removed from disk when dropped, whatever the outcome
                let temp = NamedTempFile::new()?;
                let mut writer = tokio::fs::File::from_std(temp.as_file().try_clone()?);
                while let Some(chunk) = field.chunk().await.map_err(|e| {
                    debug!("Failed to read file bytes: {}", e);
                    AppError::BadRequest(format!("Failed to read file data: {}", e))
                })? {
                    writer.write_all(&chunk).await?;
                }
                writer.flush().await?;

                spooled = Some((temp, name));
            }
            "folder_id" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read folder_id field: {}", e))
                })?;
                let text = text.trim();
                if !text.is_empty() {
                    folder_id = Some(Uuid::parse_str(text).map_err(|_| {
                        AppError::Validation(format!("folder_id '{}' is not a valid UUID", text))
                    })?);
                }
            }
            _ => {
                debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let (temp, name) =
        spooled.ok_or_else(|| AppError::BadRequest("File is required".to_string()))?;

    let result = pipeline
        .run(IngestRequest::upload(temp.path(), name, folder_id))
        .await;
    drop(temp);

    Ok(ingest_response(result?))
}

/// Import a file already on the server
///
/// The path must resolve inside the configured import directory.
/// Re-importing a catalogued path returns the existing record with `is_duplicate = true`.
#[utoipa::path(
    post,
    path = "/api/files/import",
    tag = "files",
    request_body = ImportFileDto,
    responses(
        (status = 201, description = "File ingested", body = ApiResponse<IngestResultDto>),
        (status = 200, description = "Path was already ingested", body = ApiResponse<IngestResultDto>),
        (status = 400, description = "Unsafe path, path outside the import directory, or validation error"),
        (status = 404, description = "Source file not found"),
        (status = 409, description = "Identical content already exists", body = ApiResponse<DuplicateContentDto>),
        (status = 413, description = "File too large")
    )
)]
pub async fn import_file(
    State(pipeline): State<Arc<UploadPipeline>>,
    AppJson(dto): AppJson<ImportFileDto>,
) -> Result<Response> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mut request = IngestRequest::import(&dto.path, dto.folder_id);
    request.display_name = dto.name;

    let result = pipeline.run(request).await?;
    Ok(ingest_response(result))
}

#[cfg(test)]
mod tests {
    use super::client_file_name;
    use crate::features::files::routes;
    use crate::features::files::services::UploadPipeline;
    use crate::shared::test_helpers::TestContext;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn server(ctx: &TestContext, max_upload_size: usize) -> TestServer {
        let pipeline = UploadPipeline::with_defaults(
            Arc::new(ctx.ingestion_service()),
            max_upload_size as u64,
        );
        TestServer::new(routes::routes(
            Arc::new(ctx.file_service()),
            Arc::new(pipeline),
            max_upload_size,
        ))
        .unwrap()
    }

    fn upload_form(name: &str, content: &[u8]) -> MultipartForm {
        MultipartForm::new().add_part(
            "file",
            Part::bytes(content.to_vec())
                .file_name(name)
                .mime_type("text/plain"),
        )
    }

    #[test]
    fn test_client_file_name_strips_directories() {
        assert_eq!(client_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(client_file_name("../../etc/passwd"), "passwd");
        assert_eq!(client_file_name("plain.txt"), "plain.txt");
    }

    #[tokio::test]
    async fn test_upload_stores_file_in_default_folder() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);

        let response = server
            .post("/api/files/upload")
            .multipart(upload_form("notes.txt", b"meeting notes"))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["data"]["is_duplicate"], false);
        let location = body["data"]["stored_location"].as_str().unwrap();
        assert!(location.ends_with("/Default/notes.txt"));
        assert_eq!(std::fs::read(location).unwrap(), b"meeting notes");
    }

    #[tokio::test]
    async fn test_duplicate_upload_reports_existing_file() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);

        let first: Value = server
            .post("/api/files/upload")
            .multipart(upload_form("one.txt", b"same bytes"))
            .await
            .json();
        let response = server
            .post("/api/files/upload")
            .multipart(upload_form("two.txt", b"same bytes"))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["existing_file_id"], first["data"]["file_id"]);
        assert_eq!(ctx.storage.save_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);

        let response = server
            .post("/api/files/upload")
            .multipart(MultipartForm::new().add_text("folder_id", ""))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let ctx = TestContext::new();
        let server = server(&ctx, 8);

        let response = server
            .post("/api/files/upload")
            .multipart(upload_form("big.txt", b"far more than eight bytes"))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ctx.storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_import_twice_flags_duplicate() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);
        let source = ctx.write_source("scan.txt", b"scanned page");
        let payload = json!({ "path": source.to_string_lossy() });

        let first = server.post("/api/files/import").json(&payload).await;
        let second = server.post("/api/files/import").json(&payload).await;

        first.assert_status(StatusCode::CREATED);
        second.assert_status_ok();
        let first: Value = first.json();
        let second: Value = second.json();
        assert_eq!(second["data"]["is_duplicate"], true);
        assert_eq!(second["data"]["file_id"], first["data"]["file_id"]);
    }

    #[tokio::test]
    async fn test_import_rejects_parent_references() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);

        let response = server
            .post("/api/files/import")
            .json(&json!({ "path": "/tmp/../etc/passwd" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(ctx.storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_import_outside_import_root_is_rejected() {
        let ctx = TestContext::new();
        let server = server(&ctx, 1024 * 1024);

        let response = server
            .post("/api/files/import")
            .json(&json!({ "path": "/etc/passwd" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(ctx.repository.all_files().is_empty());
    }
}
