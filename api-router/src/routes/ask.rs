use axum::{extract::State, response::IntoResponse, Json};
use common::storage::types::chat_record::ChatRecord;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub document_id: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub cited_pages: Vec<u32>,
    pub document_id: String,
}

pub async fn ask_question(
    State(state): State<ApiState>,
    Json(request): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let document_id = request.document_id.trim();
    if document_id.is_empty() {
        return Err(ApiError::ValidationError(
            "document_id must not be empty".to_string(),
        ));
    }

    info!(
        document_id,
        question_chars = request.question.chars().count(),
        "Received question"
    );

    let answer = state.qa.ask(document_id, &request.question).await?;

    let sources = answer
        .sources
        .iter()
        .filter_map(|source| source.passage.source_label())
        .collect();

    let record = ChatRecord::new(
        answer.document_id.clone(),
        request.question.trim().to_string(),
        answer.answer.clone(),
        answer.cited_pages.clone(),
    );
    if let Err(err) = record.append(&state.db).await {
        warn!(document_id, error = %err, "failed to store chat record");
    }

    Ok(Json(AskResponse {
        answer: answer.answer,
        sources,
        cited_pages: answer.cited_pages,
        document_id: answer.document_id,
    }))
}
