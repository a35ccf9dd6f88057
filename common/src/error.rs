use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Document not ready: {0}")]
    NotReady(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Corrupt file: {0}")]
    CorruptFile(String),
    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("Generation model unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Insufficient context to answer the question")]
    InsufficientContext,
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
