mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
    utils::embedding::Embedder,
};
use retrieval_pipeline::SessionRegistry;
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{chunk, embed, index, load, publish},
    state::ready,
};
use crate::{chunker::Chunker, IngestionJob};

/// Summary of a successfully ingested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub document_id: String,
    pub page_count: u32,
    pub passage_count: u32,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    registry: Arc<SessionRegistry>,
    pipeline_config: IngestionConfig,
    chunker: Chunker,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        registry: Arc<SessionRegistry>,
        embedder: Arc<dyn Embedder>,
        pipeline_config: IngestionConfig,
    ) -> Result<Self, AppError> {
        Self::with_services(
            db,
            registry,
            pipeline_config,
            Arc::new(DefaultPipelineServices::new(embedder)),
        )
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        registry: Arc<SessionRegistry>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        let chunker = Chunker::new(pipeline_config.chunking)?;
        Ok(Self {
            db,
            registry,
            pipeline_config,
            chunker,
            services,
        })
    }

    /// Runs one document through the pipeline and records the outcome.
    ///
    /// The registry is updated before the metadata store, so the document becomes queryable
    /// as soon as its index is published. A failed metadata write afterwards is only logged.
    #[tracing::instrument(
        skip_all,
        fields(document_id = %job.document_id, filename = %job.filename)
    )]
    pub async fn process_job(&self, mut job: IngestionJob) -> Result<IngestionReport, AppError> {
        let bytes = std::mem::take(&mut job.bytes);

        match self.drive_pipeline(&job, bytes).await.map_err(|err| {
            debug!(
                document_id = %job.document_id,
                error = %err,
                "ingestion pipeline failed"
            );
            err
        }) {
            Ok(report) => {
                if let Err(err) = Document::mark_ready(
                    &report.document_id,
                    report.page_count,
                    report.passage_count,
                    &self.db,
                )
                .await
                {
                    warn!(
                        document_id = %report.document_id,
                        error = %err,
                        "document is queryable but its metadata could not be updated"
                    );
                }
                info!(
                    document_id = %report.document_id,
                    pages = report.page_count,
                    passages = report.passage_count,
                    "ingestion succeeded"
                );
                Ok(report)
            }
            Err(err) => {
                let reason = err.to_string();
                self.record_failure(&job.document_id, &reason).await;
                Err(AppError::Processing(reason))
            }
        }
    }

    /// Marks a document FAILED in both the registry and the metadata store.
    pub async fn record_failure(&self, document_id: &str, reason: &str) {
        if let Err(err) = self.registry.mark_failed(document_id, reason).await {
            warn!(document_id, error = %err, "failed to mark document failed in registry");
        }
        if let Err(err) = Document::mark_failed(document_id, reason, &self.db).await {
            warn!(document_id, error = %err, "failed to record document failure");
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    async fn drive_pipeline(
        &self,
        job: &IngestionJob,
        bytes: Vec<u8>,
    ) -> Result<IngestionReport, AppError> {
        let mut ctx = PipelineContext::new(
            job,
            &self.pipeline_config,
            &self.chunker,
            self.services.as_ref(),
            self.registry.as_ref(),
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = load(machine, &mut ctx, bytes)
            .await
            .map_err(|err| ctx.abort(err))?;
        let load_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = index(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let index_duration = stage_start.elapsed();

        let _machine = publish(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        info!(
            document_id = %ctx.document_id,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            load_ms = Self::duration_millis(load_duration),
            chunk_ms = Self::duration_millis(chunk_duration),
            embed_ms = Self::duration_millis(embed_duration),
            index_ms = Self::duration_millis(index_duration),
            "ingestion pipeline finished"
        );

        Ok(IngestionReport {
            document_id: ctx.document_id.clone(),
            page_count: ctx.page_count(),
            passage_count: ctx.passage_count(),
        })
    }
}
