//! SQLite-backed vector index.
//!
//! Collections and chunk rows live in SQLite; embeddings are stored as
//! little-endian f32 BLOBs and searched by brute-force cosine similarity
//! in process.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use super::{ChunkRecord, CollectionHandle, ScoredChunk, VectorIndex};
use crate::core::errors::AppError;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    /// Serializes the list-then-delete eviction pass so concurrent ingests
    /// cannot interleave it.
    evict_lock: Mutex<()>,
}

impl SqliteVectorIndex {
    pub async fn new(db_path: PathBuf) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(AppError::internal)?;

        let index = Self {
            pool,
            evict_lock: Mutex::new(()),
        };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(AppError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_name TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(AppError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection_name)")
            .execute(&self.pool)
            .await
            .map_err(AppError::internal)?;

        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM collections WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::internal)?;
        Ok(row.is_some())
    }

    async fn insert_rows(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        collection: &str,
        rows: &[(ChunkRecord, Vec<f32>)],
    ) -> Result<(), AppError> {
        for (chunk, embedding) in rows {
            let blob = serialize_embedding(embedding);
            sqlx::query(
                "INSERT INTO chunks (collection_name, content, source, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(collection)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(AppError::internal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn create_collection(
        &self,
        session_id: &str,
        rows: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<CollectionHandle, AppError> {
        let handle = CollectionHandle::generate(session_id);
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut tx = self.pool.begin().await.map_err(AppError::internal)?;

        sqlx::query("INSERT INTO collections (name, session_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&handle.name)
            .bind(session_id)
            .bind(&created_at)
            .execute(&mut *tx)
            .await
            .map_err(AppError::internal)?;

        self.insert_rows(&mut tx, &handle.name, &rows).await?;
        tx.commit().await.map_err(AppError::internal)?;

        tracing::debug!(
            collection = %handle.name,
            chunks = rows.len(),
            "created collection"
        );
        Ok(handle)
    }

    async fn append(
        &self,
        handle: &CollectionHandle,
        rows: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<(), AppError> {
        if !self.collection_exists(&handle.name).await? {
            return Err(AppError::CollectionNotFound(handle.name.clone()));
        }

        let mut tx = self.pool.begin().await.map_err(AppError::internal)?;
        self.insert_rows(&mut tx, &handle.name, &rows).await?;
        tx.commit().await.map_err(AppError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        handle: &CollectionHandle,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        if !self.collection_exists(&handle.name).await? {
            return Err(AppError::CollectionNotFound(handle.name.clone()));
        }

        let rows = sqlx::query(
            "SELECT content, source, embedding FROM chunks WHERE collection_name = ?1",
        )
        .bind(&handle.name)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::internal)?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                let stored = deserialize_embedding(&embedding_bytes);
                ScoredChunk {
                    content: row.get("content"),
                    source: row.get("source"),
                    score: cosine_similarity(query_embedding, &stored),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn evict_oldest_beyond(&self, max_count: usize) -> Result<usize, AppError> {
        let _guard = self.evict_lock.lock().await;

        let total = self.collection_count().await?;
        if total <= max_count {
            return Ok(0);
        }
        let excess = total - max_count;

        // rowid breaks ties between collections created within the same
        // timestamp granularity.
        let victims: Vec<String> = sqlx::query(
            "SELECT name FROM collections ORDER BY created_at ASC, rowid ASC LIMIT ?1",
        )
        .bind(excess as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::internal)?
        .iter()
        .map(|row| row.get("name"))
        .collect();

        let mut tx = self.pool.begin().await.map_err(AppError::internal)?;
        for name in &victims {
            sqlx::query("DELETE FROM chunks WHERE collection_name = ?1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(AppError::internal)?;
            sqlx::query("DELETE FROM collections WHERE name = ?1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(AppError::internal)?;
        }
        tx.commit().await.map_err(AppError::internal)?;

        if !victims.is_empty() {
            tracing::info!(evicted = victims.len(), "evicted oldest collections");
        }
        Ok(victims.len())
    }

    async fn collection_count(&self) -> Result<usize, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::internal)?;
        Ok(count as usize)
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
