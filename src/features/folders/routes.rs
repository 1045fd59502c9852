use std::sync::Arc;

use axum::{routing::get, Router};

use crate::features::folders::handlers;
use crate::features::folders::services::FolderService;

/// Create routes for the folders feature
pub fn routes(service: Arc<FolderService>) -> Router {
    Router::new()
        .route(
            "/api/folders",
            get(handlers::list_folders).post(handlers::create_folder),
        )
        .route("/api/folders/tree", get(handlers::get_folder_tree))
        .route(
            "/api/folders/{id}",
            get(handlers::get_folder)
                .patch(handlers::rename_folder)
                .delete(handlers::delete_folder),
        )
        .with_state(service)
}
