//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the chunks, stored records, and retrieval results
//! that flow from the loader through the index to the answer.

use serde::Serialize;

/// Answer returned when retrieval or generation fails after the scope resolved.
pub const DEGRADED_ANSWER: &str = "Failed to get answer from language model.";

/// One page of retrievable text from a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// True 1-based page number in the source, counting skipped pages.
    pub page_number: u32,
    pub source_filename: String,
    pub content_hash: String,
    pub file_hash: String,
    pub session_id: Option<String>,
}

impl Chunk {
    /// Citation label: `"<source_filename>, page <page_number>"`.
    pub fn citation(&self) -> String {
        format!("{}, page {}", self.source_filename, self.page_number)
    }
}

/// A chunk together with its embedding, as held by an index.
#[derive(Debug, Clone)]
pub struct EmbeddedRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked chunks plus their deduplicated citations.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
    pub sources: Vec<String>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        let sources = dedup_citations(chunks.iter().map(|c| c.chunk.citation()));
        Self { chunks, sources }
    }

    /// Retrieved texts in relevance order, separated by blank lines.
    pub fn context(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Keep the first occurrence of each citation, preserving order.
pub fn dedup_citations<I>(citations: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Final response of the retrieval-and-answer pipeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

impl Answer {
    pub fn degraded() -> Self {
        Self {
            answer: DEGRADED_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Whether an ingested document reached the global index.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Inserted,
    /// A document with the same `file_hash` was already indexed.
    SkippedDuplicate,
    /// Every page was blank, so nothing was written.
    NoText,
}

/// Outcome of ingesting a single document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub session_id: Option<String>,
    pub filename: String,
    pub file_hash: String,
    pub pages: usize,
    pub status: IngestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(file: &str, page: u32, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                page_number: page,
                source_filename: file.to_string(),
                content_hash: crate::hash::content_hash(text),
                file_hash: String::new(),
                session_id: None,
            },
            score: 0.5,
        }
    }

    #[test]
    fn citation_format() {
        assert_eq!(chunk("a.pdf", 3, "x").chunk.citation(), "a.pdf, page 3");
    }

    #[test]
    fn duplicate_citations_keep_first_position() {
        let result = RetrievalResult::new(vec![
            chunk("a.pdf", 1, "one"),
            chunk("b.pdf", 2, "two"),
            chunk("a.pdf", 1, "one again"),
            chunk("c.pdf", 1, "three"),
        ]);
        assert_eq!(
            result.sources,
            vec!["a.pdf, page 1", "b.pdf, page 2", "c.pdf, page 1"]
        );
        assert_eq!(result.chunks.len(), 4);
    }

    #[test]
    fn context_joins_with_blank_lines() {
        let result = RetrievalResult::new(vec![chunk("a.pdf", 1, "one"), chunk("a.pdf", 2, "two")]);
        assert_eq!(result.context(), "one\n\ntwo");
    }

    #[test]
    fn degraded_answer_has_no_sources() {
        let a = Answer::degraded();
        assert_eq!(a.answer, DEGRADED_ANSWER);
        assert!(a.sources.is_empty());
    }
}
