use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::chat::{ChatService, Retriever};
use crate::core::config::{AppPaths, Settings};
use crate::index::SqliteVectorIndex;
use crate::ingest::IngestService;
use crate::llm::ProviderRegistry;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<Settings>,
    pub providers: Arc<ProviderRegistry>,
    pub sessions: SessionStore,
    pub ingest: Arc<IngestService>,
    pub chat: Arc<ChatService>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = Arc::new(AppPaths::new());
        let settings = Arc::new(Settings::load(&paths)?);
        let providers = Arc::new(ProviderRegistry::from_settings(&settings));
        let index = Arc::new(SqliteVectorIndex::new(paths.index_db_path.clone()).await?);
        let sessions = SessionStore::new();

        let ingest = Arc::new(IngestService::new(
            &settings,
            providers.clone(),
            index.clone(),
            sessions.clone(),
        ));
        let retriever = Retriever::new(providers.clone(), index.clone(), settings.rag.top_k);
        let chat = Arc::new(ChatService::new(
            providers.clone(),
            retriever,
            sessions.clone(),
            settings.chat.system_prompt.clone(),
            settings.chat.temperature,
        ));

        Ok(Arc::new(AppState {
            paths,
            settings,
            providers,
            sessions,
            ingest,
            chat,
            started_at: Utc::now(),
        }))
    }
}
