use common::utils::config::AppConfig;

use crate::chunker::ChunkingConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub embedding_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            embedding_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub chunking: ChunkingConfig,
    pub tuning: IngestionTuning,
}

impl From<&AppConfig> for IngestionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunking: ChunkingConfig::from(config),
            tuning: IngestionTuning {
                embedding_batch_size: config.embedding_batch_size.max(1),
            },
        }
    }
}
