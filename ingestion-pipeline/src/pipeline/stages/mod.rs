use std::sync::Arc;

use common::error::AppError;
use retrieval_pipeline::VectorIndex;
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::{
    context::PipelineContext,
    state::{Chunked, Embedded, Indexed, IngestionMachine, Loaded, Published, Ready},
};

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document_id))]
pub async fn load(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    bytes: Vec<u8>,
) -> Result<IngestionMachine<(), Loaded>, AppError> {
    let byte_len = bytes.len();
    let loaded = ctx.services.load_document(bytes).await?;

    let preview: String = loaded.text.chars().take(120).collect();
    tracing::info!(
        document_id = %ctx.document_id,
        filename = %ctx.filename,
        bytes = byte_len,
        pages = loaded.page_count(),
        text_chars = loaded.text.chars().count(),
        "document text extracted"
    );
    debug!(
        document_id = %ctx.document_id,
        preview = %preview.replace('\n', " "),
        "document text preview"
    );

    ctx.loaded = Some(loaded);

    machine
        .load()
        .map_err(|(_, guard)| map_guard_error("load", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document_id))]
pub async fn chunk(
    machine: IngestionMachine<(), Loaded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let loaded = ctx.loaded()?;
    let passages = ctx
        .chunker
        .split(&ctx.document_id, &loaded.text, &loaded.page_starts);

    debug!(
        document_id = %ctx.document_id,
        passages = passages.len(),
        chunk_size = ctx.pipeline_config.chunking.chunk_size,
        chunk_overlap = ctx.pipeline_config.chunking.chunk_overlap,
        "document chunked"
    );

    ctx.passages = passages;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document_id))]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let batch_size = ctx.pipeline_config.tuning.embedding_batch_size.max(1);
    let expected_dimension = ctx.services.embedding_dimension();
    let mut vectors = Vec::with_capacity(ctx.passages.len());

    for batch in ctx.passages.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|passage| passage.text.clone()).collect();
        let embedded = ctx.services.embed_passages(texts).await?;

        if embedded.len() != batch.len() {
            return Err(AppError::EmbeddingUnavailable(format!(
                "expected {} vectors, received {}",
                batch.len(),
                embedded.len()
            )));
        }
        if let Some(wrong) = embedded.iter().find(|v| v.len() != expected_dimension) {
            return Err(AppError::DimensionMismatch {
                expected: expected_dimension,
                actual: wrong.len(),
            });
        }

        vectors.extend(embedded);
    }

    debug!(
        document_id = %ctx.document_id,
        vectors = vectors.len(),
        batch_size,
        "passages embedded"
    );

    ctx.vectors = vectors;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document_id))]
pub async fn index(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Indexed>, AppError> {
    let vectors = std::mem::take(&mut ctx.vectors);
    let entries = vectors.into_iter().zip(ctx.passages.iter().cloned()).collect();
    let index = VectorIndex::build(entries)?;

    ctx.index = Some(Arc::new(index));

    machine
        .index()
        .map_err(|(_, guard)| map_guard_error("index", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document_id))]
pub async fn publish(
    machine: IngestionMachine<(), Indexed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Published>, AppError> {
    let index = ctx.take_index()?;
    ctx.registry.publish(&ctx.document_id, index).await?;

    machine
        .publish()
        .map_err(|(_, guard)| map_guard_error("publish", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
