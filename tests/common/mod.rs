//! Shared fixtures: hand-built PDFs and deterministic model fakes.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pdf_rag::embedding::Embedder;
use pdf_rag::error::{RagError, RagResult};
use pdf_rag::generation::Generator;
use pdf_rag::pipeline::RagPipeline;
use pdf_rag::session::SessionStorage;
use pdf_rag::store::SqliteIndex;

/// Minimal PDF with one page per entry of `pages`, Helvetica text drawn at
/// a fixed position. An empty entry produces a page with an empty content
/// stream. Text must not contain parentheses or backslashes.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    let mut out = Vec::new();
    let mut offsets = Vec::new();

    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            page_count
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        let page_id = 4 + 2 * i;
        let content_id = page_id + 1;
        let content = if text.is_empty() {
            String::new()
        } else {
            format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text)
        };

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_id, content_id
            )
            .as_bytes(),
        );

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_id,
                content.len(),
                content
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    let size = offsets.len() + 1;
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(format!("trailer << /Size {} /Root 1 0 R >>\nstartxref\n", size).as_bytes());
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

pub fn write_pdf(path: &Path, pages: &[&str]) {
    std::fs::write(path, pdf_with_pages(pages)).unwrap();
}

const DIMS: usize = 64;
const STOPWORDS: [&str; 7] = ["the", "is", "a", "what", "of", "and", "page"];

/// Bag-of-words embedder: each non-stopword lands in one of 64 buckets.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(|w| w.to_lowercase())
            .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        {
            let bucket = word
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[bucket as usize % DIMS] += 1.0;
        }
        // Keep every vector non-zero so cosine is defined.
        v[DIMS - 1] += 0.01;
        Ok(v)
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> RagResult<Vec<f32>> {
        Err(RagError::EmbeddingFailure("embedding server offline".to_string()))
    }
}

/// Returns a fixed answer and remembers every prompt it was given.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, prompt: &str) -> RagResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("The sky is blue.".to_string())
    }
}

pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> RagResult<String> {
        Err(RagError::GenerationFailure("model timed out".to_string()))
    }
}

/// Pipeline rooted at `root`, with `root/rag.sqlite` and `root/source-data`.
pub async fn pipeline_with(
    root: &Path,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
) -> RagPipeline {
    let global = SqliteIndex::open(&root.join("rag.sqlite"), embedder)
        .await
        .unwrap();
    let storage = SessionStorage::new(root.join("source-data"), &["*.pdf".to_string()]).unwrap();
    RagPipeline::new(Arc::new(global), Arc::new(storage), generator)
}

pub async fn pipeline(root: &Path) -> RagPipeline {
    pipeline_with(
        root,
        Arc::new(KeywordEmbedder),
        Arc::new(RecordingGenerator::default()),
    )
    .await
}
