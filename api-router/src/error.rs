use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Document not ready: {0}")]
    NotReady(String),

    #[error("Not enough context to answer the question")]
    InsufficientContext,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::NotReady(msg) => Self::NotReady(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::UnsupportedFormat(_) | AppError::CorruptFile(_) => {
                Self::ValidationError(err.to_string())
            }
            AppError::InsufficientContext => Self::InsufficientContext,
            AppError::EmbeddingUnavailable(_) | AppError::GenerationUnavailable(_) => {
                tracing::warn!(error = %err, "model backend unavailable");
                Self::ServiceUnavailable(err.to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(_) => StatusCode::CONFLICT,
            Self::InsufficientContext => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let error = match self {
            Self::InternalError(message)
            | Self::ValidationError(message)
            | Self::NotFound(message)
            | Self::NotReady(message)
            | Self::ServiceUnavailable(message) => message,
            Self::InsufficientContext => Self::InsufficientContext.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
