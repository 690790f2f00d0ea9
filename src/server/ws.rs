//! WebSocket chat endpoint. One socket carries any number of turns; each
//! incoming `chat` message streams back `chunk` events followed by `done`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::core::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "useRag")]
    pub use_rag: Option<bool>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(msg)) = receiver.next().await {
        let incoming = match msg {
            Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                Ok(incoming) => incoming,
                Err(err) => {
                    debug!(%err, "ignoring malformed ws message");
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        if let Err(err) = handle_message(&mut sender, &state, incoming).await {
            let failed = send_json(
                &mut sender,
                json!({"type": "error", "message": err.to_string()}),
            )
            .await
            .is_err();
            if failed {
                break;
            }
        }
    }
}

async fn handle_message(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    data: WsIncomingMessage,
) -> Result<(), AppError> {
    if data.msg_type.as_deref() != Some("chat") {
        return Ok(());
    }

    let session_id = data
        .session_id
        .ok_or_else(|| AppError::BadRequest("sessionId is required".to_string()))?;
    let message = data.message.unwrap_or_default();
    if message.trim().is_empty() {
        return Ok(());
    }

    let model = data
        .model
        .unwrap_or_else(|| state.settings.chat.default_model.clone());
    // RAG defaults to on once the session has ingested something
    let use_rag = match data.use_rag {
        Some(flag) => flag && state.sessions.get(&session_id)?.rag_available(),
        None => state.sessions.get(&session_id)?.rag_available(),
    };

    let mut stream = state
        .chat
        .stream_turn(&session_id, &message, &model, use_rag)
        .await?;

    while let Some(item) = stream.recv().await {
        match item {
            Ok(fragment) => {
                if fragment.is_empty() {
                    continue;
                }
                send_json(sender, json!({"type": "chunk", "message": fragment})).await?;
            }
            Err(err) => {
                // partial answer is already committed; report and finish
                send_json(
                    sender,
                    json!({"type": "error", "message": err.to_string()}),
                )
                .await?;
                break;
            }
        }
    }

    send_json(sender, json!({"type": "done"})).await
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    value: Value,
) -> Result<(), AppError> {
    let text = serde_json::to_string(&value).map_err(AppError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(AppError::internal)
}
