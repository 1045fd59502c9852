mod file_service;
mod ingestion_service;
mod upload_pipeline;

pub use file_service::{FileContent, FileService};
pub use ingestion_service::{ImportRoot, IngestRequest, IngestionService};
pub use upload_pipeline::{
    LoggingInterceptor, UploadContext, UploadInterceptor, UploadLimitsInterceptor, UploadPipeline,
};
