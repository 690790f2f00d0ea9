use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Catalog of chat models whose provider has a credential configured.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state.providers.available_models();
    Json(json!({
        "models": models,
        "default": state.settings.chat.default_model,
    }))
}
