use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::error::AppError;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub document_id: String,
}

/// Accepts a PDF when the client says it is one, or sends a generic type with a `.pdf` name.
fn is_pdf_upload(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    let has_pdf_extension = file_name.is_some_and(|name| {
        std::path::Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    });

    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
        Some(ct) if ct.eq_ignore_ascii_case(PDF_CONTENT_TYPE) => true,
        None | Some("application/octet-stream") => has_pdf_extension,
        Some(_) => false,
    }
}

pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = input.file.metadata.content_type.clone();
    let file_name = input.file.metadata.file_name.clone();

    if !is_pdf_upload(content_type.as_deref(), file_name.as_deref()) {
        return Err(AppError::UnsupportedFormat(format!(
            "only PDF uploads are accepted, got {}",
            content_type.as_deref().unwrap_or("an untyped file")
        ))
        .into());
    }
    let file_name = file_name.unwrap_or_else(|| "document.pdf".to_string());

    let bytes = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(AppError::from)?;
    if bytes.is_empty() {
        return Err(ApiError::ValidationError("uploaded file is empty".to_string()));
    }

    info!(file_name = %file_name, bytes = bytes.len(), "Received upload");

    let document = state.queue.submit(file_name, bytes).await?;

    Ok((
        StatusCode::OK,
        Json(UploadResponse {
            message: "File uploaded. Processing has started.".to_string(),
            document_id: document.id,
        }),
    ))
}
