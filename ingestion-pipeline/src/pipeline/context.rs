use std::sync::Arc;

use common::{error::AppError, storage::types::passage::Passage};
use retrieval_pipeline::{SessionRegistry, VectorIndex};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};
use crate::{chunker::Chunker, utils::pdf_ingestion::LoadedDocument, IngestionJob};

pub struct PipelineContext<'a> {
    pub document_id: String,
    pub filename: &'a str,
    pub pipeline_config: &'a IngestionConfig,
    pub chunker: &'a Chunker,
    pub services: &'a dyn PipelineServices,
    pub registry: &'a SessionRegistry,
    pub loaded: Option<LoadedDocument>,
    pub passages: Vec<Passage>,
    pub vectors: Vec<Vec<f32>>,
    pub index: Option<Arc<VectorIndex>>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job: &'a IngestionJob,
        pipeline_config: &'a IngestionConfig,
        chunker: &'a Chunker,
        services: &'a dyn PipelineServices,
        registry: &'a SessionRegistry,
    ) -> Self {
        Self {
            document_id: job.document_id.clone(),
            filename: &job.filename,
            pipeline_config,
            chunker,
            services,
            registry,
            loaded: None,
            passages: Vec::new(),
            vectors: Vec::new(),
            index: None,
        }
    }

    pub fn loaded(&self) -> Result<&LoadedDocument, AppError> {
        self.loaded
            .as_ref()
            .ok_or_else(|| AppError::InternalError("loaded document expected to be available".into()))
    }

    pub fn take_index(&mut self) -> Result<Arc<VectorIndex>, AppError> {
        self.index.take().ok_or_else(|| {
            AppError::InternalError("vector index expected to be available for publishing".into())
        })
    }

    pub fn page_count(&self) -> u32 {
        self.loaded
            .as_ref()
            .map_or(0, |loaded| u32::try_from(loaded.page_count()).unwrap_or(u32::MAX))
    }

    pub fn passage_count(&self) -> u32 {
        u32::try_from(self.passages.len()).unwrap_or(u32::MAX)
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.document_id,
            filename = %self.filename,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
