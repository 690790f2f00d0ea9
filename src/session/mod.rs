pub mod registry;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::errors::AppError;
use crate::index::CollectionHandle;
use crate::llm::types::ChatMessage;
use registry::SourceRegistry;

pub use registry::RegisterOutcome;

/// One user's ongoing interaction: ordered chat history, ingested sources and
/// an optional handle to the session's vector collection. Lives in memory for
/// the lifetime of the process and is never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub sources: SourceRegistry,
    pub collection: Option<CollectionHandle>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(source_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            // Greeting seed mirrors what the orchestrator shows on first load.
            messages: vec![
                ChatMessage::user("Hello"),
                ChatMessage::assistant("Hi there! How can I assist you today?"),
            ],
            sources: SourceRegistry::new(source_limit),
            collection: None,
            created_at: Utc::now(),
        }
    }

    /// RAG can only run once something has been ingested.
    pub fn rag_available(&self) -> bool {
        self.collection.is_some()
    }
}

/// Process-lifetime store of sessions, keyed by id.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, source_limit: usize) -> Session {
        let session = Session::new(source_limit);
        let mut map = self.inner.write().expect("session store poisoned");
        map.insert(session.id.clone(), session.clone());
        session
    }

    /// Snapshot of a session's current state.
    pub fn get(&self, id: &str) -> Result<Session, AppError> {
        let map = self.inner.read().expect("session store poisoned");
        map.get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))
    }

    /// Run a closure against the live session under the store lock.
    pub fn with_session<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, AppError> {
        let mut map = self.inner.write().expect("session store poisoned");
        let session = map
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
        Ok(f(session))
    }

    pub fn append_message(&self, id: &str, message: ChatMessage) -> Result<(), AppError> {
        self.with_session(id, |s| s.messages.push(message))
    }

    pub fn clear_messages(&self, id: &str) -> Result<(), AppError> {
        self.with_session(id, |s| s.messages.clear())
    }

    pub fn set_collection(&self, id: &str, handle: CollectionHandle) -> Result<(), AppError> {
        self.with_session(id, |s| s.collection = Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;

    #[test]
    fn create_seeds_the_greeting_exchange() {
        let store = SessionStore::new();
        let session = store.create(10);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::Assistant);
        assert!(!session.rag_available());
    }

    #[test]
    fn clear_truncates_the_message_list() {
        let store = SessionStore::new();
        let session = store.create(10);
        for i in 0..4 {
            store
                .append_message(&session.id, ChatMessage::user(format!("turn {i}")))
                .unwrap();
        }
        store.clear_messages(&session.id).unwrap();
        assert!(store.get(&session.id).unwrap().messages.is_empty());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = SessionStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(AppError::NotFound(_))
        ));
    }
}
