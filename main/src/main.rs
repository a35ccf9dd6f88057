use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::{Embedder, EmbeddingProvider},
    },
};
use ingestion_pipeline::{run_worker_loop, IngestionConfig, IngestionPipeline, IngestionQueue};
use retrieval_pipeline::{
    AnswerGenerator, AnswerSynthesizer, DocumentQa, OpenAiGenerator, Retriever, SessionRegistry,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let mut openai_config =
        async_openai::config::OpenAIConfig::new().with_api_base(&config.openai_base_url);
    if let Some(api_key) = &config.openai_api_key {
        openai_config = openai_config.with_api_key(api_key);
    }
    let openai_client = Arc::new(async_openai::Client::with_config(openai_config));

    let embedding_provider = Arc::new(
        EmbeddingProvider::from_config(&config, Some(Arc::clone(&openai_client))).await?,
    );
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_model = %embedding_provider.label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let generator = Arc::new(OpenAiGenerator::from_config(openai_client, &config));

    let (app_state, worker) = build_state(&config, db, embedding_provider, generator)?;

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&app_state.api_state))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {}", serve_address);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    // The queue closes with the router; wait for in-flight documents.
    match worker.await {
        Ok(Err(e)) => error!("Ingestion worker error: {}", e),
        Err(e) => error!("Ingestion worker panicked: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}

/// Wires the registry, query side and ingestion worker together and starts the worker.
fn build_state(
    config: &AppConfig,
    db: Arc<SurrealDbClient>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
) -> Result<(AppState, JoinHandle<Result<(), common::error::AppError>>), common::error::AppError>
{
    let registry = Arc::new(SessionRegistry::new());

    let synthesizer = Arc::new(AnswerSynthesizer::new(generator, config.max_context_chars));
    let qa = DocumentQa::new(
        Arc::clone(&registry),
        Retriever::new(Arc::clone(&embedder)),
        synthesizer,
    )
    .with_k(config.retrieval_k);

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        embedder,
        IngestionConfig::from(config),
    )?);

    let (queue, receiver) =
        IngestionQueue::new(Arc::clone(&db), registry, config.ingest_queue_capacity);
    let worker = tokio::spawn(run_worker_loop(
        receiver,
        ingestion_pipeline,
        config.ingest_concurrency,
    ));
    info!(
        concurrency = config.ingest_concurrency,
        "Ingestion worker started"
    );

    let api_state = ApiState::new(db, config.clone(), queue, qa);
    Ok((AppState { api_state }, worker))
}
