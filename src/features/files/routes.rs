use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::features::files::handlers;
use crate::features::files::services::{FileService, UploadPipeline};

/// Create routes for the files feature
pub fn routes(
    file_service: Arc<FileService>,
    pipeline: Arc<UploadPipeline>,
    max_upload_size: usize,
) -> Router {
    let ingest_routes = Router::new()
        .route(
            "/api/files/upload",
            // Allow body size up to max_upload_size + buffer for multipart overhead
            post(handlers::upload_file)
                .layer(DefaultBodyLimit::max(max_upload_size + 1024 * 1024)),
        )
        .route("/api/files/import", post(handlers::import_file))
        .with_state(pipeline);

    let file_routes = Router::new()
        .route("/api/files", get(handlers::list_files))
        .route(
            "/api/files/{id}",
            get(handlers::get_file)
                .patch(handlers::rename_file)
                .delete(handlers::delete_file),
        )
        .route("/api/files/{id}/content", get(handlers::get_file_content))
        .route("/api/files/{id}/thumbnail", get(handlers::get_thumbnail))
        .route("/api/files/{id}/verify", get(handlers::verify_file))
        .route("/api/files/{id}/move", post(handlers::move_file))
        .route("/api/files/{id}/tags", put(handlers::update_tags))
        .with_state(file_service);

    Router::new().merge(ingest_routes).merge(file_routes)
}
