//! Answer composition: assemble the prompt for a turn, stream the model's
//! reply to the caller and commit the result to the session history.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::core::errors::AppError;
use crate::index::ScoredChunk;
use crate::llm::types::{ChatMessage, ChatRequest};
use crate::llm::{LlmProvider, ProviderRegistry};
use crate::session::SessionStore;

use super::retriever::Retriever;

/// Marks answers that were grounded in retrieved context.
const RAG_PREFIX: &str = "*(RAG Response)*\n";

pub struct ChatService {
    providers: Arc<ProviderRegistry>,
    retriever: Retriever,
    sessions: SessionStore,
    system_prompt: String,
    temperature: f64,
}

impl ChatService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        retriever: Retriever,
        sessions: SessionStore,
        system_prompt: String,
        temperature: f64,
    ) -> Self {
        Self {
            providers,
            retriever,
            sessions,
            system_prompt,
            temperature,
        }
    }

    /// Run one turn. The user message is committed to history up front;
    /// fragments of the reply arrive on the returned receiver as the model
    /// produces them.
    ///
    /// Errors before the first token (missing credential, failed rewrite,
    /// failed retrieval) surface as `Err` here and no assistant message is
    /// recorded. Once streaming has started, a broken stream ends the turn
    /// with whatever arrived: the partial answer is kept in history and an
    /// `Err` item is the receiver's last yield. A stream that breaks before
    /// producing any text commits nothing.
    pub async fn stream_turn(
        &self,
        session_id: &str,
        user_text: &str,
        model: &str,
        use_rag: bool,
    ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError> {
        let (provider, model_id) = self.providers.resolve(model)?;

        self.sessions
            .append_message(session_id, ChatMessage::user(user_text))?;
        let session = self.sessions.get(session_id)?;

        let context = if use_rag {
            let chunks = self.retriever.retrieve(&session, user_text, model).await?;
            Some(chunks)
        } else {
            None
        };
        let grounded = context.is_some();

        let mut messages = vec![ChatMessage::system(self.render_system_prompt(&context))];
        messages.extend(session.messages.iter().cloned());
        let request = ChatRequest::new(messages).with_temperature(self.temperature);

        let mut upstream = provider.stream_chat(request, &model_id).await?;
        let (tx, rx) = mpsc::channel::<Result<String, AppError>>(32);

        let sessions = self.sessions.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            // the prefix marks the stored message only; callers never see it
            // as a streamed fragment
            let prefix = if grounded { RAG_PREFIX } else { "" };
            let mut answer = String::from(prefix);

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(fragment) => {
                        answer.push_str(&fragment);
                        if tx.send(Ok(fragment)).await.is_err() {
                            // caller went away; still commit what we have
                            break;
                        }
                    }
                    Err(err) => {
                        error!(%err, "stream broke mid-answer, keeping partial reply");
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }

            // a stream that produced nothing leaves no assistant turn behind
            if answer.len() == prefix.len() {
                info!(session_id, "stream ended without content, nothing committed");
                return;
            }

            if let Err(err) =
                sessions.append_message(&session_id, ChatMessage::assistant(answer))
            {
                error!(%err, "failed to record assistant reply");
            }
            info!(session_id, grounded, "turn complete");
        });

        Ok(rx)
    }

    /// System block for the turn: the configured instruction, and for
    /// grounded turns the retrieved chunks verbatim.
    fn render_system_prompt(&self, context: &Option<Vec<ScoredChunk>>) -> String {
        match context {
            None => self.system_prompt.clone(),
            Some(chunks) => {
                let mut prompt = self.system_prompt.clone();
                prompt.push_str("\n\nContext from the user's documents:\n");
                for chunk in chunks {
                    prompt.push_str("---\n");
                    prompt.push_str(&chunk.content);
                    prompt.push('\n');
                }
                prompt
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::core::config::Settings;
    use crate::index::{ChunkRecord, SqliteVectorIndex, VectorIndex};
    use crate::llm::types::Role;
    use crate::llm::LlmProvider;

    /// Streams a fixed script, optionally ending with an error.
    struct ScriptedProvider {
        fragments: Vec<&'static str>,
        fail_at_end: bool,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "openai"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, AppError> {
            Ok("rewritten".to_string())
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError> {
            let (tx, rx) = mpsc::channel(8);
            let fragments = self.fragments.clone();
            let fail = self.fail_at_end;
            tokio::spawn(async move {
                for fragment in fragments {
                    let _ = tx.send(Ok(fragment.to_string())).await;
                }
                if fail {
                    let _ = tx
                        .send(Err(AppError::Provider("connection reset".into())))
                        .await;
                }
            });
            Ok(rx)
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn service_with(provider: ScriptedProvider) -> (ChatService, SessionStore, Arc<SqliteVectorIndex>) {
        let db = std::env::temp_dir().join(format!(
            "docuchat-composer-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let index = Arc::new(SqliteVectorIndex::new(db).await.unwrap());
        let providers = Arc::new(
            ProviderRegistry::from_settings(&Settings::default())
                .with_provider(Arc::new(provider)),
        );
        let sessions = SessionStore::new();
        let retriever = Retriever::new(providers.clone(), index.clone(), 2);
        let service = ChatService::new(
            providers,
            retriever,
            sessions.clone(),
            "You are a test assistant.".to_string(),
            0.3,
        );
        (service, sessions, index)
    }

    async fn drain(mut rx: mpsc::Receiver<Result<String, AppError>>) -> (String, bool) {
        let mut text = String::new();
        let mut saw_error = false;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(_) => saw_error = true,
            }
        }
        (text, saw_error)
    }

    #[tokio::test]
    async fn streams_and_commits_the_full_answer() {
        let (service, sessions, _index) = service_with(ScriptedProvider {
            fragments: vec!["Hel", "lo!"],
            fail_at_end: false,
        })
        .await;
        let session = sessions.create(10);

        let rx = service
            .stream_turn(&session.id, "hi", "openai/gpt-4o", false)
            .await
            .unwrap();
        let (text, saw_error) = drain(rx).await;

        assert_eq!(text, "Hello!");
        assert!(!saw_error);

        // wait for the commit task
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let session = sessions.get(&session.id).unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hello!");
    }

    #[tokio::test]
    async fn broken_stream_keeps_the_partial_answer() {
        let (service, sessions, _index) = service_with(ScriptedProvider {
            fragments: vec!["Hel", "lo"],
            fail_at_end: true,
        })
        .await;
        let session = sessions.create(10);

        let rx = service
            .stream_turn(&session.id, "hi", "openai/gpt-4o", false)
            .await
            .unwrap();
        let (text, saw_error) = drain(rx).await;

        assert_eq!(text, "Hello");
        assert!(saw_error);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let session = sessions.get(&session.id).unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hello");
    }

    #[tokio::test]
    async fn grounded_answers_carry_the_rag_prefix() {
        let (service, sessions, index) = service_with(ScriptedProvider {
            fragments: vec!["From your documents."],
            fail_at_end: false,
        })
        .await;
        let session = sessions.create(10);

        let rows = vec![(
            ChunkRecord {
                content: "chunk".to_string(),
                source: "a.txt".to_string(),
            },
            vec![1.0, 0.0],
        )];
        let handle = index.create_collection(&session.id, rows).await.unwrap();
        sessions.set_collection(&session.id, handle).unwrap();

        let rx = service
            .stream_turn(&session.id, "what do they say?", "openai/gpt-4o", true)
            .await
            .unwrap();
        let (text, _) = drain(rx).await;
        // the marker goes into history only, never over the wire
        assert_eq!(text, "From your documents.");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let session = sessions.get(&session.id).unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.content, "*(RAG Response)*\nFrom your documents.");
    }

    #[tokio::test]
    async fn zero_fragment_failure_commits_no_assistant_turn() {
        let (service, sessions, _index) = service_with(ScriptedProvider {
            fragments: vec![],
            fail_at_end: true,
        })
        .await;
        let session = sessions.create(10);

        let rx = service
            .stream_turn(&session.id, "hi", "openai/gpt-4o", false)
            .await
            .unwrap();
        let (text, saw_error) = drain(rx).await;
        assert!(text.is_empty());
        assert!(saw_error);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let session = sessions.get(&session.id).unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "hi");
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_any_commit() {
        let (service, sessions, _index) = service_with(ScriptedProvider {
            fragments: vec![],
            fail_at_end: false,
        })
        .await;
        let session = sessions.create(10);
        let seeded_len = session.messages.len();

        let err = service
            .stream_turn(&session.id, "hi", "anthropic/claude-3-5-sonnet-20240620", false)
            .await;
        assert!(matches!(err, Err(AppError::Config(_))));

        let session = sessions.get(&session.id).unwrap();
        assert_eq!(session.messages.len(), seeded_len);
    }
}
