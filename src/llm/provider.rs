use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::AppError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name (e.g. "openai", "anthropic")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, AppError>;

    /// chat completion (streaming); the receiver yields text fragments in
    /// arrival order, or a single error item if the stream breaks mid-flight
    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError>;

    /// generate embeddings for a batch of texts
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, AppError>;
}
