//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is what the pipeline queries. Two backends
//! exist, one per index scope:
//!
//! | Backend | Scope | Lifetime |
//! |---------|-------|----------|
//! | [`SqliteIndex`] | global: every document ever ingested | persistent, opened once and shared |
//! | [`InMemoryIndex`] | one session's uploaded files | built per query, dropped afterwards |
//!
//! Both embed through an injected [`Embedder`] and rank by cosine
//! similarity with [`rank`], so results are comparable across scopes.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::RagResult;
use crate::models::{Chunk, EmbeddedRecord, ScoredChunk};

/// Default number of texts sent to the embedder per batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// A searchable collection of embedded chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Embed and append chunks |
/// | [`query`](VectorIndex::query) | Top-k most similar chunks for a question |
/// | [`all_file_hashes`](VectorIndex::all_file_hashes) | Distinct `file_hash` values present |
/// | [`len`](VectorIndex::len) | Number of stored records |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed every chunk and append one record per chunk.
    ///
    /// No chunk-level dedup happens here; callers gate on `file_hash`.
    /// If embedding fails, nothing is written.
    async fn insert(&self, chunks: &[Chunk]) -> RagResult<()>;

    /// Up to `top_k` records most similar to `question`, best first.
    /// Equal scores keep insertion order.
    async fn query(&self, question: &str, top_k: usize) -> RagResult<Vec<ScoredChunk>>;

    /// Distinct `file_hash` values in the index.
    ///
    /// Never fails: a scan error is logged and yields the empty set, so
    /// dedup degrades to "insert everything".
    async fn all_file_hashes(&self) -> HashSet<String>;

    async fn len(&self) -> RagResult<usize>;

    async fn is_empty(&self) -> RagResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Embed `chunks` in batches of `batch_size`, preserving order.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> RagResult<Vec<EmbeddedRecord>> {
    let mut records = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in batch.iter().zip(vectors) {
            records.push(EmbeddedRecord {
                chunk: chunk.clone(),
                embedding,
            });
        }
    }

    Ok(records)
}

/// Score `records` against `query_vec` and keep the best `top_k`.
///
/// `records` must be in insertion order; the stable sort keeps that order
/// among equal scores.
pub fn rank<'a, I>(query_vec: &[f32], records: I, top_k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = &'a EmbeddedRecord>,
{
    let mut scored: Vec<ScoredChunk> = records
        .into_iter()
        .map(|r| ScoredChunk {
            chunk: r.chunk.clone(),
            score: cosine_similarity(query_vec, &r.embedding),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, embedding: Vec<f32>) -> EmbeddedRecord {
        EmbeddedRecord {
            chunk: Chunk {
                text: text.to_string(),
                page_number: 1,
                source_filename: "doc.pdf".to_string(),
                content_hash: crate::hash::content_hash(text),
                file_hash: "f".to_string(),
                session_id: None,
            },
            embedding,
        }
    }

    #[test]
    fn rank_orders_by_similarity_and_truncates() {
        let records = vec![
            record("orthogonal", vec![0.0, 1.0]),
            record("exact", vec![1.0, 0.0]),
            record("close", vec![0.9, 0.1]),
        ];
        let ranked = rank(&[1.0, 0.0], &records, 2);
        let texts: Vec<&str> = ranked.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "close"]);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn rank_ties_keep_insertion_order() {
        let records = vec![
            record("first", vec![1.0, 0.0]),
            record("second", vec![2.0, 0.0]),
            record("third", vec![3.0, 0.0]),
        ];
        let ranked = rank(&[1.0, 0.0], &records, 3);
        let texts: Vec<&str> = ranked.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn rank_top_k_larger_than_collection() {
        let records = vec![record("only", vec![1.0])];
        assert_eq!(rank(&[1.0], &records, 5).len(), 1);
        assert!(rank(&[1.0], &[], 5).is_empty());
    }
}
