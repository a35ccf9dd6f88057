pub mod answer_retrieval;
pub mod retriever;
pub mod scoring;
pub mod session;
pub mod vector_index;

use std::sync::Arc;

use common::error::AppError;
use tracing::{info, instrument};

pub use answer_retrieval::{AnswerGenerator, AnswerSynthesizer, OpenAiGenerator, SynthesizedAnswer};
pub use retriever::{RetrievedPassage, Retriever, DEFAULT_TOP_K};
pub use session::SessionRegistry;
pub use vector_index::VectorIndex;

/// Answer to a question about one document, with the passages it was grounded on.
#[derive(Debug, Clone)]
pub struct QuestionAnswer {
    pub document_id: String,
    pub answer: String,
    pub cited_pages: Vec<u32>,
    pub sources: Vec<RetrievedPassage>,
}

/// Query side of the service: registry lookup, retrieval and synthesis.
#[derive(Clone)]
pub struct DocumentQa {
    registry: Arc<SessionRegistry>,
    retriever: Retriever,
    synthesizer: Arc<AnswerSynthesizer>,
    k: usize,
}

impl DocumentQa {
    pub fn new(
        registry: Arc<SessionRegistry>,
        retriever: Retriever,
        synthesizer: Arc<AnswerSynthesizer>,
    ) -> Self {
        Self {
            registry,
            retriever,
            synthesizer,
            k: DEFAULT_TOP_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn ask(&self, document_id: &str, question: &str) -> Result<QuestionAnswer, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question must not be empty".to_string()));
        }

        let index = self.registry.get(document_id).await?;
        let sources = self.retriever.retrieve(question, &index, self.k).await?;
        let synthesized = self.synthesizer.synthesize(question, &sources).await?;

        info!(
            document_id,
            sources = sources.len(),
            cited_pages = ?synthesized.cited_pages,
            "question answered"
        );

        Ok(QuestionAnswer {
            document_id: document_id.to_string(),
            answer: synthesized.answer,
            cited_pages: synthesized.cited_pages,
            sources,
        })
    }
}
