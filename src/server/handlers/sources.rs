use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::AppError;
use crate::ingest::IngestOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddUrlRequest {
    pub url: String,
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.get(&session_id)?;
    Ok(Json(json!({
        "sources": session.sources.names(),
        "limit": session.sources.limit(),
    })))
}

/// Multipart file upload. Each part is ingested independently so one bad
/// file never fails the batch; the response carries a per-file result.
pub async fn upload_sources(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    // fail fast on an unknown session instead of per file
    state.sessions.get(&session_id)?;

    let mut results: Vec<Value> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart payload: {e}")))?
    {
        let name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "unnamed".to_string());
        let declared_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read upload: {e}")))?;

        let result = state
            .ingest
            .ingest_file(&session_id, &name, &declared_type, &bytes)
            .await;
        results.push(outcome_payload(&name, result));
    }

    if results.is_empty() {
        return Err(AppError::BadRequest("no files in upload".to_string()));
    }

    Ok(Json(json!({"results": results})))
}

pub async fn add_url_source(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<AddUrlRequest>,
) -> Result<impl IntoResponse, AppError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(AppError::BadRequest("url must not be empty".to_string()));
    }

    let outcome = state.ingest.ingest_url(&session_id, url).await?;
    Ok(Json(json!({"result": outcome_payload(url, Ok(outcome))})))
}

fn outcome_payload(source: &str, result: Result<IngestOutcome, AppError>) -> Value {
    match result {
        Ok(IngestOutcome::Ingested { source, chunks }) => {
            json!({"source": source, "status": "ingested", "chunks": chunks})
        }
        Ok(IngestOutcome::AlreadyPresent { source }) => {
            json!({"source": source, "status": "duplicate"})
        }
        Ok(IngestOutcome::Skipped { source, reason }) => {
            json!({"source": source, "status": "skipped", "reason": reason})
        }
        Err(err) => json!({"source": source, "status": "error", "message": err.to_string()}),
    }
}
