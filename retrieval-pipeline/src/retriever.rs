use std::sync::Arc;

use common::{
    error::AppError, storage::types::passage::Passage, utils::embedding::Embedder,
};
use tracing::{debug, instrument};

use crate::vector_index::VectorIndex;

pub const DEFAULT_TOP_K: usize = 3;

/// A passage plus the similarity it scored against the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Embeds queries and ranks a document's passages against them.
///
/// Ranking is exactly the index's cosine order; no re-ranking is applied.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    #[instrument(skip_all, fields(k = k, index_len = index.len()))]
    pub async fn retrieve(
        &self,
        query: &str,
        index: &VectorIndex,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, AppError> {
        let Some(expected) = index.dimension() else {
            return Ok(Vec::new());
        };

        // Catch an embedder/index configuration mismatch before paying for a model call.
        let configured = self.embedder.dimension();
        if configured != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: configured,
            });
        }

        let query_vector = self.embedder.embed(query).await?;
        if query_vector.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        let hits = index.search(&query_vector, k)?;
        debug!(hits = hits.len(), "retrieved passages");

        Ok(hits
            .into_iter()
            .map(|(passage, score)| RetrievedPassage { passage, score })
            .collect())
    }
}
