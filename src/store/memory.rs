//! Ephemeral in-memory [`VectorIndex`] for session scopes.
//!
//! Records live in a `Vec` behind a `tokio::sync::RwLock`; search is
//! brute-force cosine similarity. Nothing is shared between requests:
//! each session query builds its own instance.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::models::{Chunk, EmbeddedRecord, ScoredChunk};

use super::{embed_chunks, rank, VectorIndex, DEFAULT_BATCH_SIZE};

pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    records: RwLock<Vec<EmbeddedRecord>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Build an index holding exactly `chunks`.
    pub async fn from_chunks(
        embedder: Arc<dyn Embedder>,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> RagResult<Self> {
        let index = Self::new(embedder).with_batch_size(batch_size);
        index.insert(chunks).await?;
        Ok(index)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, chunks: &[Chunk]) -> RagResult<()> {
        let embedded = embed_chunks(self.embedder.as_ref(), chunks, self.batch_size).await?;
        self.records.write().await.extend(embedded);
        Ok(())
    }

    async fn query(&self, question: &str, top_k: usize) -> RagResult<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed(question).await?;
        if query_vec.is_empty() {
            return Err(RagError::EmbeddingFailure(
                "Empty embedding for question".to_string(),
            ));
        }
        let records = self.records.read().await;
        Ok(rank(&query_vec, records.iter(), top_k))
    }

    async fn all_file_hashes(&self) -> HashSet<String> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.chunk.file_hash.clone())
            .collect()
    }

    async fn len(&self) -> RagResult<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One dimension per keyword; deterministic and order-free.
    struct KeywordEmbedder;

    const KEYWORDS: [&str; 3] = ["sky", "grass", "sea"];

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }

        async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(KEYWORDS
                .iter()
                .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> RagResult<Vec<f32>> {
            Err(RagError::EmbeddingFailure("offline".to_string()))
        }
    }

    fn chunk(file: &str, page: u32, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            page_number: page,
            source_filename: file.to_string(),
            content_hash: crate::hash::content_hash(text),
            file_hash: crate::hash::content_hash(file),
            session_id: Some("s1".to_string()),
        }
    }

    #[tokio::test]
    async fn query_returns_most_similar_first() {
        let index = InMemoryIndex::from_chunks(
            Arc::new(KeywordEmbedder),
            &[
                chunk("a.pdf", 1, "The grass is green."),
                chunk("a.pdf", 2, "The sky is blue."),
                chunk("b.pdf", 1, "The sea is deep."),
            ],
            2,
        )
        .await
        .unwrap();

        assert_eq!(index.len().await.unwrap(), 3);
        let hits = index.query("What color is the sky?", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "The sky is blue.");
    }

    #[tokio::test]
    async fn file_hashes_are_distinct() {
        let index = InMemoryIndex::from_chunks(
            Arc::new(KeywordEmbedder),
            &[chunk("a.pdf", 1, "x"), chunk("a.pdf", 2, "y"), chunk("b.pdf", 1, "z")],
            64,
        )
        .await
        .unwrap();
        assert_eq!(index.all_file_hashes().await.len(), 2);
    }

    #[tokio::test]
    async fn embedding_failure_writes_nothing() {
        let index = InMemoryIndex::new(Arc::new(FailingEmbedder));
        let err = index.insert(&[chunk("a.pdf", 1, "x")]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingFailure(_)));
        assert!(index.is_empty().await.unwrap());
    }
}
