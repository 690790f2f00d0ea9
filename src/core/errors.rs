use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the ingestion and chat paths.
///
/// `Config` blocks the whole query path and is detected before any backend
/// call. `UnsupportedSource`, `Load` and `RegistryFull` are scoped to the one
/// source being added. The remaining variants fail only the current turn.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported source type: {0}")]
    UnsupportedSource(String),
    #[error("failed to load {source_name}: {reason}")]
    Load { source_name: String, reason: String },
    #[error("maximum number of sources reached ({limit})")]
    RegistryFull { limit: usize },
    #[error("embedding service error: {0}")]
    Embedding(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("query rewrite failed: {0}")]
    QueryRewrite(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn load<E: std::fmt::Display>(source: impl Into<String>, err: E) -> Self {
        AppError::Load {
            source_name: source.into(),
            reason: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Config(_) => StatusCode::PRECONDITION_FAILED,
            AppError::UnsupportedSource(_)
            | AppError::RegistryFull { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Load { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CollectionNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Embedding(_)
            | AppError::Provider(_)
            | AppError::QueryRewrite(_)
            | AppError::Retrieval(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
