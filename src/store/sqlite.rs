//! SQLite-backed [`VectorIndex`]: the persistent global collection.
//!
//! One row per embedded chunk in the `records` table, with the vector
//! stored as a little-endian `f32` BLOB. Similarity search loads the
//! collection in `id` order and ranks it in process.
//!
//! The index is constructed explicitly with [`SqliteIndex::open`]
//! (open-or-create), shared via `Arc` for the life of the process, and
//! shut down with [`SqliteIndex::close`]. Concurrent writers are
//! serialized by SQLite itself.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::{RagError, RagResult};
use crate::migrate;
use crate::models::{Chunk, EmbeddedRecord, ScoredChunk};

use super::{embed_chunks, rank, VectorIndex, DEFAULT_BATCH_SIZE};

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl SqliteIndex {
    /// Open the collection at `path`, creating the file and schema if missing.
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> RagResult<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_records(&pool).await?;
        tracing::info!(path = %path.display(), model = embedder.model_name(), "vector index opened");

        Ok(Self {
            pool,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Flush and close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Distinct `file_hash` values, surfacing scan errors as
    /// [`RagError::DedupScanFailure`].
    pub async fn try_file_hashes(&self) -> RagResult<HashSet<String>> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT DISTINCT file_hash FROM records")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RagError::DedupScanFailure(e.to_string()))?;
        Ok(hashes.into_iter().collect())
    }

    /// Delete every record ingested under `session_id`. Returns the count removed.
    pub async fn delete_session(&self, session_id: &str) -> RagResult<u64> {
        let result = sqlx::query("DELETE FROM records WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(
            session_id,
            removed = result.rows_affected(),
            "deleted session records"
        );
        Ok(result.rows_affected())
    }

    /// Distinct `file_hash` values of the records tagged with `session_id`.
    pub async fn session_file_hashes(&self, session_id: &str) -> RagResult<HashSet<String>> {
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT file_hash FROM records WHERE session_id = ?")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(hashes.into_iter().collect())
    }

    /// Move the records of one document from session `from` to session `to`.
    pub async fn reassign_file(&self, file_hash: &str, from: &str, to: &str) -> RagResult<u64> {
        let result =
            sqlx::query("UPDATE records SET session_id = ? WHERE session_id = ? AND file_hash = ?")
                .bind(to)
                .bind(from)
                .bind(file_hash)
                .execute(&self.pool)
                .await?;
        tracing::info!(
            file_hash,
            from,
            to,
            moved = result.rows_affected(),
            "reassigned shared records"
        );
        Ok(result.rows_affected())
    }

    async fn load_records(&self) -> RagResult<Vec<EmbeddedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT text, filename, page, content_hash, file_hash, session_id, embedding
            FROM records
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let page: i64 = row.get("page");
                let blob: Vec<u8> = row.get("embedding");
                EmbeddedRecord {
                    chunk: Chunk {
                        text: row.get("text"),
                        page_number: page as u32,
                        source_filename: row.get("filename"),
                        content_hash: row.get("content_hash"),
                        file_hash: row.get("file_hash"),
                        session_id: row.get("session_id"),
                    },
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, chunks: &[Chunk]) -> RagResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let embedded = embed_chunks(self.embedder.as_ref(), chunks, self.batch_size).await?;
        let model = self.embedder.model_name().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        for record in &embedded {
            let chunk = &record.chunk;
            sqlx::query(
                r#"
                INSERT INTO records (text, filename, page, content_hash, file_hash,
                                     session_id, embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.text)
            .bind(&chunk.source_filename)
            .bind(chunk.page_number as i64)
            .bind(&chunk.content_hash)
            .bind(&chunk.file_hash)
            .bind(&chunk.session_id)
            .bind(vec_to_blob(&record.embedding))
            .bind(&model)
            .bind(record.embedding.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(records = embedded.len(), "inserted records");
        Ok(())
    }

    async fn query(&self, question: &str, top_k: usize) -> RagResult<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed(question).await?;
        if query_vec.is_empty() {
            return Err(RagError::EmbeddingFailure(
                "Empty embedding for question".to_string(),
            ));
        }
        let records = self.load_records().await?;
        Ok(rank(&query_vec, records.iter(), top_k))
    }

    async fn all_file_hashes(&self) -> HashSet<String> {
        match self.try_file_hashes().await {
            Ok(hashes) => hashes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch file-level hashes; dedup disabled for this call");
                HashSet::new()
            }
        }
    }

    async fn len(&self) -> RagResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }

        async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
            Ok(vec![1.0, text.len() as f32 / 100.0])
        }
    }

    fn chunk(file: &str, page: u32, text: &str, session: Option<&str>) -> Chunk {
        Chunk {
            text: text.to_string(),
            page_number: page,
            source_filename: file.to_string(),
            content_hash: crate::hash::content_hash(text),
            file_hash: crate::hash::content_hash(file),
            session_id: session.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rag.sqlite");

        let index = SqliteIndex::open(&path, Arc::new(LengthEmbedder)).await.unwrap();
        index
            .insert(&[
                chunk("a.pdf", 1, "first page", Some("s1")),
                chunk("a.pdf", 3, "third page", Some("s1")),
            ])
            .await
            .unwrap();
        index.close().await;

        let reopened = SqliteIndex::open(&path, Arc::new(LengthEmbedder)).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        let hashes = reopened.all_file_hashes().await;
        assert!(hashes.contains(&crate::hash::content_hash("a.pdf")));

        let hits = reopened.query("first page", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        let pages: HashSet<u32> = hits.iter().map(|h| h.chunk.page_number).collect();
        assert_eq!(pages, HashSet::from([1, 3]));
        assert_eq!(hits[0].chunk.session_id.as_deref(), Some("s1"));
        reopened.close().await;
    }

    #[tokio::test]
    async fn delete_session_removes_only_that_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::open(&dir.path().join("rag.sqlite"), Arc::new(LengthEmbedder))
            .await
            .unwrap();
        index
            .insert(&[
                chunk("a.pdf", 1, "alpha", Some("s1")),
                chunk("b.pdf", 1, "beta", Some("s2")),
                chunk("c.pdf", 1, "gamma", None),
            ])
            .await
            .unwrap();

        assert_eq!(index.delete_session("s1").await.unwrap(), 1);
        assert_eq!(index.len().await.unwrap(), 2);
        assert!(!index
            .all_file_hashes()
            .await
            .contains(&crate::hash::content_hash("a.pdf")));
    }

    #[tokio::test]
    async fn reassign_file_moves_one_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::open(&dir.path().join("rag.sqlite"), Arc::new(LengthEmbedder))
            .await
            .unwrap();
        index
            .insert(&[
                chunk("a.pdf", 1, "alpha", Some("s1")),
                chunk("a.pdf", 2, "alpha two", Some("s1")),
                chunk("b.pdf", 1, "beta", Some("s1")),
            ])
            .await
            .unwrap();

        let a_hash = crate::hash::content_hash("a.pdf");
        assert_eq!(index.session_file_hashes("s1").await.unwrap().len(), 2);
        assert_eq!(index.reassign_file(&a_hash, "s1", "s2").await.unwrap(), 2);
        assert_eq!(
            index.session_file_hashes("s2").await.unwrap(),
            HashSet::from([a_hash])
        );
        assert_eq!(index.delete_session("s1").await.unwrap(), 1);
        assert_eq!(index.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scan_failure_degrades_to_empty_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::open(&dir.path().join("rag.sqlite"), Arc::new(LengthEmbedder))
            .await
            .unwrap();
        index.insert(&[chunk("a.pdf", 1, "alpha", None)]).await.unwrap();

        index.close().await;
        assert!(matches!(
            index.try_file_hashes().await,
            Err(RagError::DedupScanFailure(_))
        ));
        assert!(index.all_file_hashes().await.is_empty());
    }
}
