#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod pipeline;
pub mod utils;

use std::{collections::HashMap, sync::Arc};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionReport, IngestionTuning};
use retrieval_pipeline::SessionRegistry;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::{error, info, instrument, warn};

/// A document waiting to be ingested.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub document_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Accepts uploads: records them as pending and hands them to the background worker.
#[derive(Clone)]
pub struct IngestionQueue {
    sender: mpsc::Sender<IngestionJob>,
    db: Arc<SurrealDbClient>,
    registry: Arc<SessionRegistry>,
}

impl IngestionQueue {
    pub fn new(
        db: Arc<SurrealDbClient>,
        registry: Arc<SessionRegistry>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<IngestionJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                db,
                registry,
            },
            receiver,
        )
    }

    /// Returns as soon as the document is recorded and queued; ingestion continues in the
    /// background.
    #[instrument(skip_all, fields(filename = %filename, bytes = bytes.len()))]
    pub async fn submit(&self, filename: String, bytes: Vec<u8>) -> Result<Document, AppError> {
        let document = Document::create_pending(filename, &self.db).await?;
        self.registry.mark_pending(&document.id).await?;

        let job = IngestionJob {
            document_id: document.id.clone(),
            filename: document.filename.clone(),
            bytes,
        };

        if self.sender.send(job).await.is_err() {
            let reason = "ingestion worker is not running";
            if let Err(err) = self.registry.mark_failed(&document.id, reason).await {
                warn!(document_id = %document.id, error = %err, "failed to mark document failed");
            }
            if let Err(err) = Document::mark_failed(&document.id, reason, &self.db).await {
                warn!(document_id = %document.id, error = %err, "failed to record document failure");
            }
            return Err(AppError::InternalError(reason.to_string()));
        }

        info!(document_id = %document.id, "document queued for ingestion");
        Ok(document)
    }
}

/// Receives jobs until every queue handle is dropped, running up to `concurrency` documents at
/// once. Finished jobs are settled as they complete, so a job that panics marks its document
/// failed while the queue stays open; the loop keeps going.
pub async fn run_worker_loop(
    mut receiver: mpsc::Receiver<IngestionJob>,
    ingestion_pipeline: Arc<IngestionPipeline>,
    concurrency: usize,
) -> Result<(), AppError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();

    loop {
        tokio::select! {
            Some(result) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                settle(&ingestion_pipeline, &mut in_flight, result).await;
            }
            job = receiver.recv() => {
                let Some(job) = job else { break };

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|err| {
                        AppError::InternalError(format!("ingestion semaphore closed: {err}"))
                    })?;

                let document_id = job.document_id.clone();
                let pipeline = Arc::clone(&ingestion_pipeline);
                let handle = tasks.spawn(async move {
                    let _permit = permit;
                    pipeline.process_job(job).await
                });
                in_flight.insert(handle.id(), document_id);
            }
        }
    }

    while let Some(result) = tasks.join_next_with_id().await {
        settle(&ingestion_pipeline, &mut in_flight, result).await;
    }

    info!("ingestion queue closed; worker loop exiting");
    Ok(())
}

async fn settle(
    pipeline: &IngestionPipeline,
    in_flight: &mut HashMap<tokio::task::Id, String>,
    result: Result<(tokio::task::Id, Result<IngestionReport, AppError>), tokio::task::JoinError>,
) {
    match result {
        Ok((id, outcome)) => {
            let document_id = in_flight.remove(&id).unwrap_or_default();
            if let Err(err) = outcome {
                error!(%document_id, error = %err, "ingestion job failed");
            }
        }
        Err(join_error) => {
            let Some(document_id) = in_flight.remove(&join_error.id()) else {
                error!(error = %join_error, "ingestion task ended without a known document");
                return;
            };
            error!(%document_id, error = %join_error, "ingestion task panicked");
            pipeline
                .record_failure(&document_id, &format!("ingestion task aborted: {join_error}"))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        storage::types::document::DocumentState,
        utils::embedding::{Embedder, EmbeddingProvider},
    };
    use crate::{pipeline::PipelineServices, utils::pdf_ingestion::LoadedDocument};
    use std::time::Duration;
    use uuid::Uuid;

    /// Treats uploads as UTF-8 text with form feeds between pages.
    struct PlainTextServices {
        embedder: EmbeddingProvider,
    }

    #[async_trait]
    impl PipelineServices for PlainTextServices {
        async fn load_document(&self, bytes: Vec<u8>) -> Result<LoadedDocument, AppError> {
            let text = String::from_utf8(bytes)
                .map_err(|err| AppError::UnsupportedFormat(err.to_string()))?;
            if text.contains("PANIC") {
                panic!("loader crashed");
            }
            tokio::task::yield_now().await;
            Ok(LoadedDocument::from_pages(text.split('\u{c}')))
        }

        async fn embed_passages(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
            self.embedder.embed_batch(texts).await
        }

        fn embedding_dimension(&self) -> usize {
            self.embedder.dimension()
        }
    }

    async fn harness(
        concurrency: usize,
    ) -> (
        IngestionQueue,
        tokio::task::JoinHandle<Result<(), AppError>>,
        Arc<SurrealDbClient>,
        Arc<SessionRegistry>,
    ) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let registry = Arc::new(SessionRegistry::new());
        let services = Arc::new(PlainTextServices {
            embedder: EmbeddingProvider::new_hashed(64).expect("hashed provider"),
        });
        let pipeline = Arc::new(
            IngestionPipeline::with_services(
                Arc::clone(&db),
                Arc::clone(&registry),
                IngestionConfig::default(),
                services,
            )
            .expect("pipeline"),
        );
        let (queue, receiver) = IngestionQueue::new(Arc::clone(&db), Arc::clone(&registry), 8);
        let worker = tokio::spawn(run_worker_loop(receiver, pipeline, concurrency));
        (queue, worker, db, registry)
    }

    #[tokio::test]
    async fn test_submit_returns_pending_document() {
        let (queue, worker, db, registry) = harness(1).await;

        let document = queue
            .submit("notes.pdf".into(), b"hello".to_vec())
            .await
            .expect("submit");
        assert_eq!(document.state, DocumentState::Pending);
        assert!(registry.state(&document.id).await.is_some());

        drop(queue);
        worker.await.expect("join worker").expect("worker loop");

        let stored = Document::get(&document.id, &db).await.expect("document");
        assert_eq!(stored.state, DocumentState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_documents_are_indexed_independently() {
        let (queue, worker, db, registry) = harness(2).await;

        let apples = "Apples grow in orchards.\u{c}Apple pie needs cinnamon.".repeat(30);
        let rockets = "Rockets burn fuel.\u{c}Orbital mechanics govern satellites.".repeat(30);

        let (first, second) = tokio::join!(
            queue.submit("apples.pdf".into(), apples.into_bytes()),
            queue.submit("rockets.pdf".into(), rockets.into_bytes())
        );
        let first = first.expect("submit apples");
        let second = second.expect("submit rockets");

        drop(queue);
        worker.await.expect("join worker").expect("worker loop");

        for (document, marker) in [(&first, "Apple"), (&second, "Rocket")] {
            let index = registry.get(&document.id).await.expect("ready index");
            assert!(!index.is_empty());
            assert!(index.passages().all(|p| p.document_id == document.id));
            assert!(index.passages().any(|p| p.text.contains(marker)));

            let stored = Document::get(&document.id, &db).await.expect("document");
            assert_eq!(stored.state, DocumentState::Ready);
        }
        assert!(registry
            .get(&first.id)
            .await
            .expect("apples")
            .passages()
            .all(|p| !p.text.contains("Rocket")));
    }

    #[tokio::test]
    async fn test_panicking_job_marks_document_failed_and_worker_continues() {
        let (queue, worker, db, registry) = harness(1).await;

        let crashing = queue
            .submit("crash.pdf".into(), b"PANIC".to_vec())
            .await
            .expect("submit crash");
        let healthy = queue
            .submit("fine.pdf".into(), b"perfectly fine text".to_vec())
            .await
            .expect("submit fine");

        drop(queue);
        worker.await.expect("join worker").expect("worker loop");

        assert_eq!(
            registry.state(&crashing.id).await,
            Some(DocumentState::Failed)
        );
        let stored = Document::get(&crashing.id, &db).await.expect("document");
        assert_eq!(stored.state, DocumentState::Failed);
        assert!(registry.get(&healthy.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_job_fails_while_queue_stays_open() {
        let (queue, worker, db, registry) = harness(1).await;

        let crashing = queue
            .submit("crash.pdf".into(), b"PANIC".to_vec())
            .await
            .expect("submit crash");

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = Document::get(&crashing.id, &db).await.expect("document");
                if stored.state == DocumentState::Failed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("document should fail without further uploads");

        assert_eq!(
            registry.state(&crashing.id).await,
            Some(DocumentState::Failed)
        );
        assert!(matches!(
            registry.get(&crashing.id).await,
            Err(AppError::NotReady(_))
        ));

        drop(queue);
        worker.await.expect("join worker").expect("worker loop");
    }

    #[tokio::test]
    async fn test_submit_without_worker_fails_document() {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let registry = Arc::new(SessionRegistry::new());
        let (queue, receiver) = IngestionQueue::new(Arc::clone(&db), Arc::clone(&registry), 1);
        drop(receiver);

        let result = queue.submit("orphan.pdf".into(), b"text".to_vec()).await;
        assert!(matches!(result, Err(AppError::InternalError(_))));

        let documents = Document::list_recent(&db).await.expect("list");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].state, DocumentState::Failed);
    }
}
