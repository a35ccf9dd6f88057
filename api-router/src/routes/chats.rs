use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{chat_record::ChatRecord, document::Document};
use serde::Serialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct ChatRecordResponse {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub cited_pages: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub chats: Vec<ChatRecordResponse>,
}

/// Chat history for a document, oldest exchange first.
pub async fn list_chats(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // 404 for unknown documents rather than an empty history
    Document::get(&document_id, &state.db).await?;

    let chats = ChatRecord::list_for_document(&document_id, &state.db)
        .await?
        .into_iter()
        .map(|record| ChatRecordResponse {
            id: record.id,
            question: record.question,
            answer: record.answer,
            cited_pages: record.cited_pages,
            created_at: record.created_at,
        })
        .collect();

    Ok(Json(ChatHistoryResponse { chats }))
}
