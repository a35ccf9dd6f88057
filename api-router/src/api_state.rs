use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::IngestionQueue;
use retrieval_pipeline::DocumentQa;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub queue: IngestionQueue,
    pub qa: DocumentQa,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        queue: IngestionQueue,
        qa: DocumentQa,
    ) -> Self {
        Self {
            db,
            config,
            queue,
            qa,
        }
    }
}
