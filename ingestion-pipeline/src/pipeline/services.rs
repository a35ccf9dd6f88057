use std::sync::Arc;

use async_trait::async_trait;
use common::{error::AppError, utils::embedding::Embedder};

use crate::utils::pdf_ingestion::{load_pdf, LoadedDocument};

/// External work the pipeline depends on: reading the file and calling the embedding model.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn load_document(&self, bytes: Vec<u8>) -> Result<LoadedDocument, AppError>;

    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;

    fn embedding_dimension(&self) -> usize;
}

pub struct DefaultPipelineServices {
    embedder: Arc<dyn Embedder>,
}

impl DefaultPipelineServices {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn load_document(&self, bytes: Vec<u8>) -> Result<LoadedDocument, AppError> {
        load_pdf(bytes).await
    }

    async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        self.embedder.embed_batch(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }
}
