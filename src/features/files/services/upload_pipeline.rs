//! Ordered interceptors wrapped around every ingestion
//!
//! `before` hooks run in registration order and may veto the upload; `after`
//! hooks run in reverse order and see the final outcome.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::files::dtos::IngestResultDto;
use crate::features::files::services::{IngestRequest, IngestionService};
use crate::shared::paths::ensure_safe_source_path;

/// What interceptors know about an upload in flight
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub upload_id: Uuid,
    pub source: String,
    pub display_name: Option<String>,
    pub folder_id: Option<Uuid>,
    /// Size of the source, when it could be read
    pub size_bytes: Option<u64>,
    pub started_at: Instant,
}

#[async_trait]
pub trait UploadInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before(&self, _ctx: &UploadContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _ctx: &UploadContext, _outcome: &Result<IngestResultDto>) {}
}

/// Structured log lines for every upload
pub struct LoggingInterceptor;

#[async_trait]
impl UploadInterceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn before(&self, ctx: &UploadContext) -> Result<()> {
        info!(
            upload_id = %ctx.upload_id,
            source = %ctx.source,
            name = ?ctx.display_name,
            size_bytes = ?ctx.size_bytes,
            folder_id = ?ctx.folder_id,
            "Upload started"
        );
        Ok(())
    }

    async fn after(&self, ctx: &UploadContext, outcome: &Result<IngestResultDto>) {
        let elapsed_ms = ctx.started_at.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => info!(
                upload_id = %ctx.upload_id,
                file_id = %result.file_id,
                is_duplicate = result.is_duplicate,
                elapsed_ms,
                "Upload finished"
            ),
            Err(AppError::DuplicateContent { file_id, .. }) => info!(
                upload_id = %ctx.upload_id,
                existing_file_id = %file_id,
                elapsed_ms,
                "Upload rejected as duplicate content"
            ),
            Err(e) => warn!(
                upload_id = %ctx.upload_id,
                elapsed_ms,
                "Upload failed: {}",
                e
            ),
        }
    }
}

/// Rejects sources larger than the configured maximum
pub struct UploadLimitsInterceptor {
    max_size_bytes: u64,
}

impl UploadLimitsInterceptor {
    pub fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }
}

#[async_trait]
impl UploadInterceptor for UploadLimitsInterceptor {
    fn name(&self) -> &'static str {
        "upload_limits"
    }

    async fn before(&self, ctx: &UploadContext) -> Result<()> {
        match ctx.size_bytes {
            Some(size) if size > self.max_size_bytes => Err(AppError::PayloadTooLarge(format!(
                "File too large. Maximum size is {} bytes ({} MB)",
                self.max_size_bytes,
                self.max_size_bytes / 1024 / 1024
            ))),
            _ => Ok(()),
        }
    }
}

/// Entry point for uploads and imports
pub struct UploadPipeline {
    ingestion: Arc<IngestionService>,
    interceptors: Vec<Arc<dyn UploadInterceptor>>,
}

impl UploadPipeline {
    pub fn new(
        ingestion: Arc<IngestionService>,
        interceptors: Vec<Arc<dyn UploadInterceptor>>,
    ) -> Self {
        Self {
            ingestion,
            interceptors,
        }
    }

    /// Pipeline with the standard logging and size-limit interceptors
    pub fn with_defaults(ingestion: Arc<IngestionService>, max_size_bytes: u64) -> Self {
        Self::new(
            ingestion,
            vec![
                Arc::new(LoggingInterceptor),
                Arc::new(UploadLimitsInterceptor::new(max_size_bytes)),
            ],
        )
    }

    pub async fn run(&self, request: IngestRequest) -> Result<IngestResultDto> {
        ensure_safe_source_path(&request.source_path)?;

        let ctx = UploadContext {
            upload_id: Uuid::now_v7(),
            source: request.source_path.display().to_string(),
            display_name: request.display_name.clone(),
            folder_id: request.folder_id,
            size_bytes: tokio::fs::metadata(&request.source_path)
                .await
                .ok()
                .map(|m| m.len()),
            started_at: Instant::now(),
        };

        for (entered, interceptor) in self.interceptors.iter().enumerate() {
            if let Err(e) = interceptor.before(&ctx).await {
                warn!("Interceptor '{}' rejected upload {}", interceptor.name(), ctx.upload_id);
                let outcome = Err(e);
                for previous in self.interceptors[..entered].iter().rev() {
                    previous.after(&ctx, &outcome).await;
                }
                return outcome;
            }
        }

        let outcome = self.ingestion.ingest(request).await;

        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(&ctx, &outcome).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_helpers::TestContext;
    use std::sync::Mutex;

    /// Records hook invocations in order
    struct Recorder {
        label: &'static str,
        events: Arc<Mutex<Vec<String>>>,
        veto: bool,
    }

    #[async_trait]
    impl UploadInterceptor for Recorder {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn before(&self, _ctx: &UploadContext) -> Result<()> {
            self.events.lock().unwrap().push(format!("before:{}", self.label));
            if self.veto {
                return Err(AppError::BadRequest("vetoed".to_string()));
            }
            Ok(())
        }

        async fn after(&self, _ctx: &UploadContext, outcome: &Result<IngestResultDto>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", self.label, outcome.is_ok()));
        }
    }

    fn recorder(label: &'static str, events: &Arc<Mutex<Vec<String>>>, veto: bool) -> Arc<dyn UploadInterceptor> {
        Arc::new(Recorder {
            label,
            events: Arc::clone(events),
            veto,
        })
    }

    #[tokio::test]
    async fn test_interceptors_wrap_ingestion_in_order() {
        let ctx = TestContext::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipeline = UploadPipeline::new(
            Arc::new(ctx.ingestion_service()),
            vec![recorder("outer", &events, false), recorder("inner", &events, false)],
        );
        let source = ctx.write_source("a.txt", b"a");

        pipeline.run(IngestRequest::import(&source, None)).await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "before:outer",
                "before:inner",
                "after:inner:true",
                "after:outer:true"
            ]
        );
    }

    #[tokio::test]
    async fn test_veto_skips_ingestion() {
        let ctx = TestContext::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipeline = UploadPipeline::new(
            Arc::new(ctx.ingestion_service()),
            vec![recorder("outer", &events, false), recorder("gate", &events, true)],
        );
        let source = ctx.write_source("a.txt", b"a");

        let result = pipeline.run(IngestRequest::import(&source, None)).await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["before:outer", "before:gate", "after:outer:false"]
        );
        assert_eq!(ctx.storage.save_count(), 0);
    }

    #[tokio::test]
    async fn test_size_limit_rejects_large_sources() {
        let ctx = TestContext::new();
        let pipeline = UploadPipeline::with_defaults(Arc::new(ctx.ingestion_service()), 8);
        let small = ctx.write_source("small.txt", b"tiny");
        let large = ctx.write_source("large.txt", b"definitely more than eight bytes");

        assert!(pipeline.run(IngestRequest::import(&small, None)).await.is_ok());
        assert!(matches!(
            pipeline.run(IngestRequest::import(&large, None)).await,
            Err(AppError::PayloadTooLarge(_))
        ));
        assert_eq!(ctx.storage.save_count(), 1);
    }
}
