use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::AppError;
use crate::session::Session;
use crate::state::AppState;

pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.sessions.create(state.settings.rag.max_sources);
    Json(session_payload(&session))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.get(&session_id)?;
    Ok(Json(session_payload(&session)))
}

/// Truncates the message history; sources and the indexed collection are
/// untouched, so RAG keeps working over the already-ingested documents.
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.clear_messages(&session_id)?;
    Ok(Json(json!({"status": "cleared", "sessionId": session_id})))
}

fn session_payload(session: &Session) -> Value {
    let messages: Vec<Value> = session
        .messages
        .iter()
        .map(|msg| json!({"role": msg.role, "content": msg.content}))
        .collect();

    json!({
        "id": session.id,
        "createdAt": session.created_at.to_rfc3339(),
        "messages": messages,
        "sources": session.sources.names(),
        "ragAvailable": session.rag_available(),
    })
}
