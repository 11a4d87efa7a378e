//! Error taxonomy for the retrieval core.
//!
//! Loader and scope-resolution errors abort the operation that raised them.
//! Generation errors are degraded by the pipeline into a fixed fallback
//! answer, and dedup scan errors are logged and swallowed by the store.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    /// The document could not be opened or parsed.
    #[error("Failed to load PDF {}: {cause}", path.display())]
    LoadFailure { path: PathBuf, cause: String },

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// The session folder is missing or holds no files.
    #[error("No source data found for session ID: {0}")]
    SessionNotFound(String),

    /// The session folder holds files, but none yielded any text.
    #[error("No valid documents found in session: {0}")]
    NoDocuments(String),

    #[error("Index metadata scan failed: {0}")]
    DedupScanFailure(String),

    #[error("Invalid session ID: {0:?}")]
    InvalidSessionId(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Scope-resolution failures that callers surface as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RagError::SessionNotFound(_) | RagError::NoDocuments(_)
        )
    }

    /// Failures caused by caller input rather than by the system.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            RagError::InvalidSessionId(_) | RagError::InvalidUpload(_) | RagError::EmptyQuestion
        )
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
