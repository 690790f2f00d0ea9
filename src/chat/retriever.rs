//! Conversation-aware retrieval: rewrite the latest question into a
//! standalone search query, embed it and pull the closest chunks.

use std::sync::Arc;

use tracing::debug;

use crate::core::errors::AppError;
use crate::index::{ScoredChunk, VectorIndex};
use crate::llm::types::{ChatMessage, ChatRequest, Role};
use crate::llm::{LlmProvider, ProviderRegistry};
use crate::session::Session;

/// Appended after the conversation so the chat model produces a query that
/// stands on its own, resolving pronouns against recent turns.
const REWRITE_INSTRUCTION: &str = "Given the above conversation, generate a search query to \
     look up in order to get information relevant to the conversation, focusing on the most \
     recent messages.";

pub struct Retriever {
    providers: Arc<ProviderRegistry>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(providers: Arc<ProviderRegistry>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self {
            providers,
            index,
            top_k,
        }
    }

    /// Top chunks for this turn. The session must have a collection.
    pub async fn retrieve(
        &self,
        session: &Session,
        query: &str,
        model: &str,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let handle = session
            .collection
            .clone()
            .ok_or_else(|| AppError::Retrieval("no documents ingested for this session".into()))?;

        let search_query = if session.messages.is_empty() {
            query.to_string()
        } else {
            self.rewrite_query(session, query, model).await?
        };
        debug!(%search_query, "retrieving context");

        let (embedder, embedding_model) = self.providers.embedder()?;
        let embeddings = embedder
            .embed(&[search_query], &embedding_model)
            .await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding("embedding response was empty".into()))?;

        self.index
            .search(&handle, &query_embedding, self.top_k)
            .await
    }

    async fn rewrite_query(
        &self,
        session: &Session,
        query: &str,
        model: &str,
    ) -> Result<String, AppError> {
        let (provider, model_id) = self.providers.resolve(model)?;

        let mut messages = session.messages.clone();
        // callers that commit the turn before retrieving already have the
        // question as the last history entry
        let question_is_last = matches!(
            messages.last(),
            Some(last) if last.role == Role::User && last.content == query
        );
        if !question_is_last {
            messages.push(ChatMessage::user(query));
        }
        messages.push(ChatMessage::user(REWRITE_INSTRUCTION));

        let rewritten = provider
            .chat(ChatRequest::new(messages), &model_id)
            .await
            .map_err(|e| AppError::QueryRewrite(e.to_string()))?;

        let rewritten = rewritten.trim().to_string();
        if rewritten.is_empty() {
            // fall back to the literal question rather than searching nothing
            Ok(query.to_string())
        } else {
            Ok(rewritten)
        }
    }
}
