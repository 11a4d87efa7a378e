//! PDF loading: one [`Chunk`] per page that carries text.
//!
//! Pages are extracted in order with `pdf-extract`. Blank and
//! whitespace-only pages are dropped, but the surviving chunks keep their
//! true page numbers. The document's `file_hash` covers the raw text of the
//! kept pages only.
//!
//! Parsing is CPU-bound, so async callers go through [`load_pdf_async`],
//! which moves the work onto the blocking pool.

use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};
use crate::hash;
use crate::models::Chunk;

/// Chunks of a single document plus its whole-document digest.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub chunks: Vec<Chunk>,
    pub file_hash: String,
}

/// Parse the PDF at `path` into page chunks.
///
/// Any read or parse error aborts the whole load with
/// [`RagError::LoadFailure`]. The file buffer is dropped on every exit path.
pub fn load_pdf(path: &Path) -> RagResult<LoadedDocument> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let loaded = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| load_pdf_bytes(&bytes, &filename))
        .map_err(|cause| {
            tracing::error!(path = %path.display(), error = %cause, "failed to load PDF");
            load_failure(path, cause)
        })?;

    tracing::info!(
        path = %path.display(),
        chunks = loaded.chunks.len(),
        "loaded chunks from PDF"
    );
    Ok(loaded)
}

/// Async wrapper around [`load_pdf`] that parses on the blocking pool.
pub async fn load_pdf_async(path: PathBuf) -> RagResult<LoadedDocument> {
    let display = path.clone();
    tokio::task::spawn_blocking(move || load_pdf(&path))
        .await
        .map_err(|e| load_failure(&display, e))?
}

/// Parse an uploaded PDF held in memory, on the blocking pool.
///
/// Failures map to [`RagError::LoadFailure`] with `filename` as the path.
pub async fn load_upload_async(bytes: Vec<u8>, filename: String) -> RagResult<LoadedDocument> {
    let display = PathBuf::from(&filename);
    tokio::task::spawn_blocking(move || {
        load_pdf_bytes(&bytes, &filename).map_err(|cause| {
            tracing::error!(file = %filename, error = %cause, "failed to load uploaded PDF");
            load_failure(Path::new(&filename), cause)
        })
    })
    .await
    .map_err(|e| load_failure(&display, e))?
}

/// Parse in-memory PDF bytes. `filename` is used verbatim as the source name.
pub fn load_pdf_bytes(bytes: &[u8], filename: &str) -> Result<LoadedDocument, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())?;
    Ok(chunk_pages(pages, filename))
}

/// Turn raw page texts into chunks. Page numbers are 1-based positions in `pages`.
fn chunk_pages(pages: Vec<String>, filename: &str) -> LoadedDocument {
    let kept: Vec<(u32, String)> = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| (i as u32 + 1, text))
        .collect();

    let file_hash = hash::file_hash(kept.iter().map(|(_, text)| text.as_str()));

    let chunks = kept
        .into_iter()
        .map(|(page_number, text)| Chunk {
            content_hash: hash::content_hash(&text),
            text,
            page_number,
            source_filename: filename.to_string(),
            file_hash: file_hash.clone(),
            session_id: None,
        })
        .collect();

    LoadedDocument { chunks, file_hash }
}

fn load_failure(path: &Path, cause: impl std::fmt::Display) -> RagError {
    RagError::LoadFailure {
        path: path.to_path_buf(),
        cause: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn blank_pages_are_skipped_but_numbering_is_preserved() {
        let doc = chunk_pages(pages(&["intro\n", "   \n", "", "body\n"]), "guide.pdf");
        let numbers: Vec<u32> = doc.chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert!(doc.chunks.iter().all(|c| c.source_filename == "guide.pdf"));
    }

    #[test]
    fn file_hash_covers_only_kept_pages() {
        let with_blanks = chunk_pages(pages(&["a\n", "\n\n", "b\n"]), "x.pdf");
        let without = chunk_pages(pages(&["a\n", "b\n"]), "x.pdf");
        assert_eq!(with_blanks.file_hash, without.file_hash);
        assert_eq!(with_blanks.file_hash, hash::content_hash("a\nb\n"));
        assert!(with_blanks.chunks.iter().all(|c| c.file_hash == with_blanks.file_hash));
    }

    #[test]
    fn content_hash_is_per_page_text() {
        let doc = chunk_pages(pages(&["alpha", "beta"]), "x.pdf");
        assert_eq!(doc.chunks[0].content_hash, hash::content_hash("alpha"));
        assert_eq!(doc.chunks[1].content_hash, hash::content_hash("beta"));
    }

    #[test]
    fn no_text_yields_empty_digest() {
        let doc = chunk_pages(pages(&[" ", "\n"]), "empty.pdf");
        assert!(doc.chunks.is_empty());
        assert_eq!(doc.file_hash, hash::content_hash(""));
    }

    #[test]
    fn invalid_pdf_is_a_load_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = load_pdf(&path).unwrap_err();
        match err {
            RagError::LoadFailure { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected LoadFailure, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_load_failure() {
        let err = load_pdf(Path::new("/nonexistent/nowhere.pdf")).unwrap_err();
        assert!(matches!(err, RagError::LoadFailure { .. }));
    }
}
