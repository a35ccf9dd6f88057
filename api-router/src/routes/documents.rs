use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::document::{Document, DocumentState};
use serde::Serialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub state: DocumentState,
    pub error_message: Option<String>,
    pub page_count: Option<u32>,
    pub passage_count: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            filename: document.filename,
            state: document.state,
            error_message: document.error_message,
            page_count: document.page_count,
            passage_count: document.passage_count,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

pub async fn list_documents(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = Document::list_recent(&state.db)
        .await?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();

    Ok(Json(DocumentListResponse { documents }))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&id, &state.db).await?;
    Ok(Json(DocumentResponse::from(document)))
}
