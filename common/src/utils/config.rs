use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum EmbeddingBackend {
    OpenAI,
    #[default]
    FastEmbed,
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(anyhow::anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai', 'hashed', or 'fastembed'."
            )),
        }
    }
}

impl TryFrom<String> for EmbeddingBackend {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_upload_max_body_bytes")]
    pub upload_max_body_bytes: usize,
}

fn default_http_port() -> u16 {
    8000
}

fn default_surrealdb_address() -> String {
    "mem://".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "pdf_chat".to_string()
}

fn default_surrealdb_database() -> String {
    "pdf_chat".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generation_temperature() -> f32 {
    0.1
}

fn default_generation_max_tokens() -> u32 {
    512
}

fn default_embedding_dimensions() -> u32 {
    384
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_retrieval_k() -> usize {
    3
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_ingest_concurrency() -> usize {
    4
}

fn default_ingest_queue_capacity() -> usize {
    64
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_upload_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: default_surrealdb_credential(),
            surrealdb_password: default_surrealdb_credential(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            openai_api_key: None,
            openai_base_url: default_base_url(),
            generation_model: default_generation_model(),
            generation_temperature: default_generation_temperature(),
            generation_max_tokens: default_generation_max_tokens(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
            fastembed_cache_dir: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            retrieval_k: default_retrieval_k(),
            max_context_chars: default_max_context_chars(),
            ingest_concurrency: default_ingest_concurrency(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            embedding_batch_size: default_embedding_batch_size(),
            upload_max_body_bytes: default_upload_max_body_bytes(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
