pub mod sqlite;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::errors::AppError;

pub use sqlite::SqliteVectorIndex;

/// Reference to one session's collection of embedded chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    pub name: String,
}

impl CollectionHandle {
    /// Millisecond timestamp plus session id keeps names unique across
    /// concurrent sessions and readable in logs. Eviction does not depend on
    /// this encoding; it orders by the stored creation time.
    pub fn generate(session_id: &str) -> Self {
        Self {
            name: format!("{}_{}", Utc::now().timestamp_millis(), session_id),
        }
    }
}

/// A chunk ready for insertion: text plus originating source name.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub content: String,
    pub source: String,
}

/// A retrieved chunk with its similarity score (higher = closer).
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub content: String,
    pub source: String,
    pub score: f32,
}

/// Storage backend for embedded chunks.
///
/// Embedding happens in the caller; the index only ever sees finished
/// vectors, so a failed embedding call can never leave a partial collection
/// behind.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a fresh collection for the session and insert the rows in one
    /// transaction.
    async fn create_collection(
        &self,
        session_id: &str,
        rows: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<CollectionHandle, AppError>;

    /// Append rows to an existing collection. `CollectionNotFound` if the
    /// collection has been evicted in the meantime.
    async fn append(
        &self,
        handle: &CollectionHandle,
        rows: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<(), AppError>;

    /// Top-`k` chunks by cosine similarity, descending.
    async fn search(
        &self,
        handle: &CollectionHandle,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, AppError>;

    /// Delete the oldest collections until at most `max_count` remain.
    /// Process-wide: collections from every session count against the bound.
    /// Returns the number of collections evicted.
    async fn evict_oldest_beyond(&self, max_count: usize) -> Result<usize, AppError>;

    async fn collection_count(&self) -> Result<usize, AppError>;
}
