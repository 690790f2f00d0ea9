//! Ingestion pipeline: load a source, split it, embed the chunks and index
//! them under the session's collection.

pub mod loader;
pub mod splitter;

use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};

use crate::core::config::Settings;
use crate::core::errors::AppError;
use crate::index::{ChunkRecord, VectorIndex};
use crate::llm::{LlmProvider, ProviderRegistry};
use crate::session::{RegisterOutcome, SessionStore};

pub use loader::{declared_kind, Document, SourceKind};
pub use splitter::ChunkSplitter;

/// Per-source result of an ingestion request. Only hard failures surface as
/// errors; duplicates and unsupported types are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { source: String, chunks: usize },
    /// The source name is already registered for this session.
    AlreadyPresent { source: String },
    /// Declared type is not one we can parse.
    Skipped { source: String, reason: String },
}

pub struct IngestService {
    providers: Arc<ProviderRegistry>,
    index: Arc<dyn VectorIndex>,
    sessions: SessionStore,
    splitter: ChunkSplitter,
    client: Client,
    max_collections: usize,
}

impl IngestService {
    pub fn new(
        settings: &Settings,
        providers: Arc<ProviderRegistry>,
        index: Arc<dyn VectorIndex>,
        sessions: SessionStore,
    ) -> Self {
        let client = Client::builder()
            .user_agent(settings.rag.user_agent.clone())
            .build()
            .unwrap_or_default();

        Self {
            providers,
            index,
            sessions,
            splitter: ChunkSplitter::new(settings.rag.chunk_size, settings.rag.chunk_overlap),
            client,
            max_collections: settings.rag.max_collections,
        }
    }

    /// Ingest one uploaded file into the session's collection.
    pub async fn ingest_file(
        &self,
        session_id: &str,
        name: &str,
        declared_type: &str,
        bytes: &[u8],
    ) -> Result<IngestOutcome, AppError> {
        if let Some(outcome) = self.precheck(session_id, name)? {
            return Ok(outcome);
        }

        let Some(kind) = declared_kind(declared_type, name) else {
            warn!(source = name, declared_type, "skipping unsupported source type");
            return Ok(IngestOutcome::Skipped {
                source: name.to_string(),
                reason: format!("unsupported type: {declared_type}"),
            });
        };

        let documents = loader::load_file(bytes, kind, name)?;
        self.index_documents(session_id, name, documents).await
    }

    /// Fetch a URL and ingest its text into the session's collection.
    pub async fn ingest_url(&self, session_id: &str, url: &str) -> Result<IngestOutcome, AppError> {
        if let Some(outcome) = self.precheck(session_id, url)? {
            return Ok(outcome);
        }

        let document = loader::load_url(&self.client, url).await?;
        self.index_documents(session_id, url, vec![document]).await
    }

    /// Duplicate and capacity checks against the session's source registry.
    /// Nothing is registered yet; that happens only after indexing succeeds.
    fn precheck(&self, session_id: &str, name: &str) -> Result<Option<IngestOutcome>, AppError> {
        self.sessions.with_session(session_id, |session| {
            if session.sources.contains(name) {
                return Ok(Some(IngestOutcome::AlreadyPresent {
                    source: name.to_string(),
                }));
            }
            if session.sources.len() >= session.sources.limit() {
                return Err(AppError::RegistryFull {
                    limit: session.sources.limit(),
                });
            }
            Ok(None)
        })?
    }

    /// Record the source in the session registry. A non-`Accepted` outcome
    /// here means another ingest of the same session raced us between the
    /// precheck and indexing; the chunks are already indexed either way, so
    /// log the anomaly rather than failing the request.
    fn finalize_registration(&self, session_id: &str, source: &str) -> Result<(), AppError> {
        let outcome = self
            .sessions
            .with_session(session_id, |session| session.sources.register(source))?;
        match outcome {
            RegisterOutcome::Accepted => {}
            RegisterOutcome::Duplicate => {
                warn!(source, "source was registered concurrently; chunks may be duplicated");
            }
            RegisterOutcome::Full { limit } => {
                warn!(source, limit, "registry filled while indexing; source left unregistered");
            }
        }
        Ok(())
    }

    /// Split, embed and index the loaded documents, then register the source.
    async fn index_documents(
        &self,
        session_id: &str,
        source: &str,
        documents: Vec<Document>,
    ) -> Result<IngestOutcome, AppError> {
        let mut chunks: Vec<ChunkRecord> = Vec::new();
        for document in &documents {
            for piece in self.splitter.split(&document.text) {
                chunks.push(ChunkRecord {
                    content: piece,
                    source: source.to_string(),
                });
            }
        }
        if chunks.is_empty() {
            return Err(AppError::load(source, "no extractable text"));
        }

        let (embedder, embedding_model) = self.providers.embedder()?;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed(&texts, &embedding_model).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let rows: Vec<_> = chunks.into_iter().zip(embeddings).collect();
        let chunk_count = rows.len();

        let existing = self.sessions.get(session_id)?.collection;
        match existing {
            Some(handle) => {
                self.index.append(&handle, rows).await?;
            }
            None => {
                let handle = self.index.create_collection(session_id, rows).await?;
                self.sessions.set_collection(session_id, handle)?;
                let evicted = self.index.evict_oldest_beyond(self.max_collections).await?;
                if evicted > 0 {
                    info!(evicted, "evicted oldest collections to stay within bound");
                }
            }
        }

        // registration last: a failed index call must leave the registry
        // untouched so the source can be retried
        self.finalize_registration(session_id, source)?;

        info!(source, chunks = chunk_count, "ingested source");
        Ok(IngestOutcome::Ingested {
            source: source.to_string(),
            chunks: chunk_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::index::SqliteVectorIndex;
    use crate::llm::types::ChatRequest;
    use crate::llm::LlmProvider;

    /// Embedding double registered under the real embedding provider's name.
    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeEmbedder {
        fn name(&self) -> &str {
            "openai"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, AppError> {
            Ok(String::new())
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError> {
            Err(AppError::Provider("not used in this test".into()))
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Embedding("simulated outage".into()));
            }
            Ok(inputs
                .iter()
                .map(|text| vec![text.len() as f32, 1.0, 0.0])
                .collect())
        }
    }

    /// Embeds onto one of two axes by sentinel presence and rewrites every
    /// query to mention the sentinel, so the full ingest-then-retrieve path
    /// has a deterministic winner.
    struct SentinelProvider;

    #[async_trait]
    impl LlmProvider for SentinelProvider {
        fn name(&self) -> &str {
            "openai"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, AppError> {
            Ok("what does the kestrel-blue passphrase unlock?".to_string())
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError> {
            Err(AppError::Provider("not used in this test".into()))
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(inputs
                .iter()
                .map(|text| {
                    if text.contains("kestrel-blue") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct Fixture {
        service: IngestService,
        sessions: SessionStore,
        index: Arc<SqliteVectorIndex>,
        embedder: Arc<FakeEmbedder>,
    }

    async fn fixture(fail_embedding: bool) -> Fixture {
        let db = std::env::temp_dir().join(format!(
            "docuchat-ingest-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let index = Arc::new(SqliteVectorIndex::new(db).await.unwrap());
        let embedder = Arc::new(FakeEmbedder::new(fail_embedding));
        let providers = Arc::new(
            ProviderRegistry::from_settings(&Settings::default())
                .with_provider(embedder.clone()),
        );
        let sessions = SessionStore::new();
        let service = IngestService::new(
            &Settings::default(),
            providers,
            index.clone(),
            sessions.clone(),
        );
        Fixture {
            service,
            sessions,
            index,
            embedder,
        }
    }

    #[tokio::test]
    async fn first_file_creates_the_session_collection() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(10);

        let outcome = fx
            .service
            .ingest_file(&session.id, "notes.txt", "text/plain", b"some notes")
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Ingested { chunks: 1, .. }));
        let session = fx.sessions.get(&session.id).unwrap();
        assert!(session.rag_available());
        assert_eq!(session.sources.names(), &["notes.txt"]);
        assert_eq!(fx.index.collection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_file_appends_to_the_same_collection() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(10);

        fx.service
            .ingest_file(&session.id, "a.txt", "text/plain", b"first")
            .await
            .unwrap();
        fx.service
            .ingest_file(&session.id, "b.txt", "text/plain", b"second")
            .await
            .unwrap();

        assert_eq!(fx.index.collection_count().await.unwrap(), 1);
        let session = fx.sessions.get(&session.id).unwrap();
        assert_eq!(session.sources.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_source_is_skipped_without_reembedding() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(10);

        fx.service
            .ingest_file(&session.id, "notes.txt", "text/plain", b"some notes")
            .await
            .unwrap();
        let outcome = fx
            .service
            .ingest_file(&session.id, "notes.txt", "text/plain", b"different bytes")
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::AlreadyPresent { .. }));
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.sessions.get(&session.id).unwrap().sources.len(), 1);
    }

    #[tokio::test]
    async fn full_registry_rejects_without_mutation() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(2);

        for name in ["a.txt", "b.txt"] {
            fx.service
                .ingest_file(&session.id, name, "text/plain", b"text")
                .await
                .unwrap();
        }
        let err = fx
            .service
            .ingest_file(&session.id, "c.txt", "text/plain", b"text")
            .await;

        assert!(matches!(err, Err(AppError::RegistryFull { limit: 2 })));
        let session = fx.sessions.get(&session.id).unwrap();
        assert_eq!(session.sources.len(), 2);
        assert!(!session.sources.contains("c.txt"));
    }

    #[tokio::test]
    async fn unsupported_type_is_a_warning_not_an_error() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(10);

        let outcome = fx
            .service
            .ingest_file(&session.id, "archive.zip", "application/zip", b"PK")
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Skipped { .. }));
        let session = fx.sessions.get(&session.id).unwrap();
        assert!(session.sources.is_empty());
        assert!(!session.rag_available());
    }

    #[tokio::test]
    async fn ingested_sentinel_comes_back_from_retrieval() {
        let db = std::env::temp_dir().join(format!(
            "docuchat-roundtrip-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let index = Arc::new(SqliteVectorIndex::new(db).await.unwrap());
        let providers = Arc::new(
            ProviderRegistry::from_settings(&Settings::default())
                .with_provider(Arc::new(SentinelProvider)),
        );
        let sessions = SessionStore::new();
        let service = IngestService::new(
            &Settings::default(),
            providers.clone(),
            index.clone(),
            sessions.clone(),
        );
        let session = sessions.create(10);

        service
            .ingest_file(
                &session.id,
                "secrets.txt",
                "text/plain",
                b"The kestrel-blue passphrase unlocks the side door.",
            )
            .await
            .unwrap();
        service
            .ingest_file(
                &session.id,
                "errands.txt",
                "text/plain",
                b"Buy oat milk and return the library books.",
            )
            .await
            .unwrap();

        let retriever = crate::chat::Retriever::new(providers, index, 1);
        let session = sessions.get(&session.id).unwrap();
        let chunks = retriever
            .retrieve(&session, "what does the passphrase unlock?", "openai/gpt-4o")
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("kestrel-blue"));
        assert_eq!(chunks[0].source, "secrets.txt");
    }

    #[tokio::test]
    async fn racing_registration_does_not_duplicate_or_fail() {
        let fx = fixture(false).await;
        let session = fx.sessions.create(2);

        // same name lands between precheck and registration
        fx.sessions
            .with_session(&session.id, |s| s.sources.register("notes.txt"))
            .unwrap();
        fx.service
            .finalize_registration(&session.id, "notes.txt")
            .unwrap();
        assert_eq!(fx.sessions.get(&session.id).unwrap().sources.len(), 1);

        // registry fills up in the same window: outcome is logged, not raised
        fx.sessions
            .with_session(&session.id, |s| s.sources.register("other.txt"))
            .unwrap();
        fx.service
            .finalize_registration(&session.id, "late.txt")
            .unwrap();
        let session = fx.sessions.get(&session.id).unwrap();
        assert_eq!(session.sources.len(), 2);
        assert!(!session.sources.contains("late.txt"));
    }

    #[tokio::test]
    async fn embedding_failure_leaves_no_partial_state() {
        let fx = fixture(true).await;
        let session = fx.sessions.create(10);

        let err = fx
            .service
            .ingest_file(&session.id, "notes.txt", "text/plain", b"some notes")
            .await;

        assert!(matches!(err, Err(AppError::Embedding(_))));
        let session = fx.sessions.get(&session.id).unwrap();
        assert!(session.sources.is_empty());
        assert!(!session.rag_available());
        assert_eq!(fx.index.collection_count().await.unwrap(), 0);
    }
}
