use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    ask::ask_question,
    chats::list_chats,
    documents::{get_document, list_documents},
    liveness::health,
    readiness::ready,
    upload::upload_document,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes
    let probes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let documents = Router::new()
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(
                app_state.config.upload_max_body_bytes,
            )),
        )
        .route("/ask", post(ask_question))
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/chats/{document_id}", get(list_chats));

    probes.merge(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use common::{
        error::AppError,
        storage::{
            db::SurrealDbClient,
            types::{chat_record::ChatRecord, document::Document, passage::Passage},
        },
        utils::{
            config::AppConfig,
            embedding::{Embedder, EmbeddingProvider},
        },
    };
    use ingestion_pipeline::{IngestionJob, IngestionQueue};
    use retrieval_pipeline::{
        AnswerGenerator, AnswerSynthesizer, DocumentQa, Retriever, SessionRegistry, VectorIndex,
    };
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct CannedGenerator;

    #[async_trait]
    impl AnswerGenerator for CannedGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, AppError> {
            Ok("Borrowing lets code use a value without owning it.".to_string())
        }
    }

    struct TestApp {
        router: Router,
        state: ApiState,
        embedder: Arc<EmbeddingProvider>,
        // Held so queued jobs are accepted but never processed.
        _jobs: mpsc::Receiver<IngestionJob>,
    }

    async fn test_app() -> TestApp {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("init schema");

        let embedder = Arc::new(EmbeddingProvider::new_hashed(64).expect("hashed provider"));
        let registry = Arc::new(SessionRegistry::new());
        let synthesizer = Arc::new(AnswerSynthesizer::new(Arc::new(CannedGenerator), 4000));
        let qa = DocumentQa::new(
            Arc::clone(&registry),
            Retriever::new(Arc::clone(&embedder) as Arc<dyn Embedder>),
            synthesizer,
        );
        let (queue, jobs) = IngestionQueue::new(Arc::clone(&db), registry, 8);

        let state = ApiState::new(db, AppConfig::default(), queue, qa);
        let router = api_routes_v1(&state).with_state(state.clone());

        TestApp {
            router,
            state,
            embedder,
            _jobs: jobs,
        }
    }

    async fn publish_ready_document(app: &TestApp, pages: &[&str]) -> String {
        let document = Document::create_pending("book.pdf".into(), &app.state.db)
            .await
            .expect("create document");

        let mut entries = Vec::new();
        for (i, text) in pages.iter().enumerate() {
            let vector = app.embedder.embed(text).await.expect("embed");
            let page = u32::try_from(i + 1).ok();
            entries.push((
                vector,
                Passage {
                    document_id: document.id.clone(),
                    ordinal: i,
                    text: (*text).to_string(),
                    char_range: 0..text.chars().count(),
                    page,
                    last_page: page,
                },
            ));
        }
        let index = VectorIndex::build(entries).expect("index");

        let registry = app.state.qa.registry();
        registry.mark_pending(&document.id).await.expect("pending");
        registry
            .publish(&document.id, Arc::new(index))
            .await
            .expect("publish");
        Document::mark_ready(&document.id, 2, 2, &app.state.db)
            .await
            .expect("mark ready");

        document.id
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.expect("router response")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn ask_request(document_id: &str, question: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ask")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "question": question, "document_id": document_id })
                    .to_string(),
            ))
            .expect("request")
    }

    fn multipart_upload(file_name: &str, content_type: &str, contents: &[u8]) -> Request<Body> {
        let boundary = "X-TEST-BOUNDARY";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let app = test_app().await;

        let response = send(
            &app.router,
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "OK");
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let app = test_app().await;

        let response = send(
            &app.router,
            multipart_upload("notes.txt", "text/plain", b"just text"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let documents = Document::list_recent(&app.state.db).await.expect("list");
        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn test_upload_returns_pending_document() {
        let app = test_app().await;

        let response = send(
            &app.router,
            multipart_upload("paper.pdf", "application/pdf", b"%PDF-1.5 body"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let document_id = body["document_id"].as_str().expect("document id").to_string();

        let response = send(
            &app.router,
            Request::builder()
                .uri(format!("/documents/{document_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["state"], "PENDING");
        assert_eq!(body["filename"], "paper.pdf");

        let response = send(&app.router, ask_request(&document_id, "What is this?")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ask_unknown_document_is_not_found() {
        let app = test_app().await;

        let response = send(&app.router, ask_request("missing", "Anything?")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ask_rejects_blank_question() {
        let app = test_app().await;
        let document_id = publish_ready_document(&app, &["Some page text."]).await;

        let response = send(&app.router, ask_request(&document_id, "   ")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ask_ready_document_answers_and_records_chat() {
        let app = test_app().await;
        let document_id = publish_ready_document(
            &app,
            &[
                "Ownership means every value has a single owner.",
                "Borrowing lets code use a value without taking ownership.",
            ],
        )
        .await;

        let response = send(
            &app.router,
            ask_request(&document_id, "What does borrowing mean?"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["document_id"], document_id.as_str());
        assert!(body["answer"]
            .as_str()
            .is_some_and(|answer| answer.contains("Borrowing")));
        let sources: Vec<&str> = body["sources"]
            .as_array()
            .expect("sources")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|label| label.starts_with("Page ")));

        let records = ChatRecord::list_for_document(&document_id, &app.state.db)
            .await
            .expect("chat records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question, "What does borrowing mean?");

        let response = send(
            &app.router,
            Request::builder()
                .uri(format!("/chats/{document_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let chats = body["chats"].as_array().expect("chats envelope");
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0]["question"], "What does borrowing mean?");
    }

    #[tokio::test]
    async fn test_chats_for_unknown_document_is_not_found() {
        let app = test_app().await;

        let response = send(
            &app.router,
            Request::builder()
                .uri("/chats/does-not-exist")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_documents_listed_newest_first() {
        let app = test_app().await;
        let first = Document::create_pending("first.pdf".into(), &app.state.db)
            .await
            .expect("first");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = Document::create_pending("second.pdf".into(), &app.state.db)
            .await
            .expect("second");

        let response = send(
            &app.router,
            Request::builder()
                .uri("/documents")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let ids: Vec<&str> = body["documents"]
            .as_array()
            .expect("documents envelope")
            .iter()
            .filter_map(|doc| doc["id"].as_str())
            .collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    }
}
