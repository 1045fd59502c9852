mod core;
mod features;
mod modules;
mod shared;

use crate::core::config::{Config, StorageBackendKind};
use crate::core::openapi::{ApiDoc, SwaggerInfoModifier};
use crate::core::{database, middleware};
use crate::features::files::{
    routes as files_routes, FileService, ImportRoot, IngestionService, UploadPipeline,
};
use crate::features::folders::{routes as folders_routes, DestinationResolver, FolderService};
use crate::modules::hashing::ContentHasher;
use crate::modules::metadata::PhotoMetadataExtractor;
use crate::modules::persistence::{CatalogRepository, PgCatalogRepository};
use crate::modules::storage::{LocalStorage, ObjectStorage, StorageBackend};
use axum::{middleware::from_fn, Router};
use std::sync::Arc;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn main() -> anyhow::Result<()> {
    // Build Tokio runtime with configurable worker threads
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(worker_threads * 4)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(worker_threads))
}

async fn async_main(worker_threads: usize) -> anyhow::Result<()> {
    // Load .env file BEFORE initializing logger so RUST_LOG is available
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Log system info
    let available_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    tracing::info!(
        "System info: available_cpus={}, tokio_worker_threads={}, pid={}",
        available_cpus,
        worker_threads,
        std::process::id()
    );

    tracing::info!("Configuration loaded successfully");

    // Create database connection pool
    let pool = database::create_pool(&config.database).await?;
    tracing::info!("Database connection pool created");

    // Run migrations automatically
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    tracing::info!("Database migrations completed successfully");

    // Initialize storage backend
    let storage: Arc<dyn StorageBackend> = match config.storage.backend {
        StorageBackendKind::Local => Arc::new(
            LocalStorage::new(&config.storage.local)
                .map_err(|e| anyhow::anyhow!("Failed to initialize local storage: {}", e))?,
        ),
        StorageBackendKind::Object => {
            let object = ObjectStorage::connect(config.storage.object.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize object storage: {}", e))?;
            tracing::info!(
                "Object storage initialized for bucket: {}",
                config.storage.object.bucket
            );
            Arc::new(object)
        }
    };

    // Initialize catalog repository
    let repository: Arc<dyn CatalogRepository> = Arc::new(PgCatalogRepository::new(pool));

    // Make sure the default folder exists before accepting uploads
    let resolver = Arc::new(DestinationResolver::new(
        Arc::clone(&repository),
        Arc::clone(&storage),
    ));
    let default_folder = resolver
        .bootstrap()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepare default folder: {}", e))?;
    tracing::info!(
        "Default folder ready: id={}, path={}",
        default_folder.id,
        default_folder.path
    );

    // Shared HTTP client for remote hashing
    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    let hasher = ContentHasher::new(http_client);

    // Server-side imports are only read from below the import root
    std::fs::create_dir_all(&config.storage.import_root).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create import directory {}: {}",
            config.storage.import_root.display(),
            e
        )
    })?;
    tracing::info!("Import root: {}", config.storage.import_root.display());

    // Initialize Ingestion Service and upload pipeline
    let ingestion_service = Arc::new(IngestionService::new(
        Arc::clone(&repository),
        Arc::clone(&storage),
        Arc::clone(&resolver),
        hasher.clone(),
        PhotoMetadataExtractor::new(),
        ImportRoot::new(&config.storage.import_root),
    ));
    let upload_pipeline = Arc::new(UploadPipeline::with_defaults(
        ingestion_service,
        config.app.max_upload_size as u64,
    ));
    tracing::info!(
        "Ingestion service initialized (max upload size: {} bytes)",
        config.app.max_upload_size
    );

    // Initialize File Service
    let file_service = Arc::new(FileService::new(
        Arc::clone(&repository),
        Arc::clone(&storage),
        hasher,
    ));
    tracing::info!("File service initialized");

    // Initialize Folder Service
    let folder_service = Arc::new(FolderService::new(
        Arc::clone(&repository),
        Arc::clone(&storage),
        Arc::clone(&resolver),
    ));
    tracing::info!("Folder service initialized");

    // Build application router with dynamic swagger config
    let swagger_modifier = SwaggerInfoModifier {
        title: config.swagger.title.clone(),
        version: config.swagger.version.clone(),
        description: config.swagger.description.clone(),
    };

    let mut openapi = ApiDoc::openapi();
    swagger_modifier.modify(&mut openapi);

    // Build swagger router
    let swagger = if let Some(credentials) = config.swagger.credentials() {
        tracing::info!("Swagger UI basic auth enabled");
        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
            .layer(from_fn(middleware::basic_auth_middleware(Arc::new(
                credentials,
            ))))
    } else {
        tracing::info!("Swagger UI basic auth disabled (no credentials configured)");
        Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
    };

    let api_routes = Router::new()
        .merge(files_routes::routes(
            file_service,
            upload_pipeline,
            config.app.max_upload_size,
        ))
        .merge(folders_routes::routes(folder_service));

    // Simple health check endpoint
    async fn health_check() -> axum::http::StatusCode {
        axum::http::StatusCode::OK
    }
    let health_route = Router::new().route("/health", axum::routing::get(health_check));

    let app = Router::new()
        .merge(swagger)
        .merge(api_routes)
        .merge(health_route)
        .layer(middleware::cors_layer(
            config.app.cors_allowed_origins.clone(),
        ))
        // Propagate X-Request-Id to response headers
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(middleware::MakeSpanWithRequestId)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Generate X-Request-Id using UUID v7 (or use client-provided one)
        .layer(SetRequestIdLayer::x_request_id(middleware::MakeRequestUuid));

    // Start server
    let addr = config.app.server_address();
    let socket_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    // Use socket2 for TCP listener configuration
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(socket_addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nodelay(true)?;

    socket.set_recv_buffer_size(256 * 1024)?;
    socket.set_send_buffer_size(256 * 1024)?;

    #[cfg(target_os = "linux")]
    {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(60))
            .with_interval(std::time::Duration::from_secs(10))
            .with_retries(3);
        socket.set_tcp_keepalive(&keepalive)?;
    }
    #[cfg(not(target_os = "linux"))]
    {
        let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(60));
        socket.set_tcp_keepalive(&keepalive)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(65535)?;

    let listener = tokio::net::TcpListener::from_std(socket.into())?;
    tracing::info!("Server listening on {}", format!("http://{}", addr));
    tracing::info!(
        "Swagger UI available at {}",
        format!("http://{}/swagger-ui/", addr)
    );

    axum::serve(listener, app).await?;

    Ok(())
}
