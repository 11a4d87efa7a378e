//! Retrieval-and-answer pipeline plus the ingestion entry points.
//!
//! [`RagPipeline`] owns the global [`SqliteIndex`], the session resolver
//! and the generator. It is built once at startup with
//! [`RagPipeline::from_config`] and shared behind an `Arc`.
//!
//! # Answer flow
//!
//! 1. Resolve the index scope from the optional session id.
//! 2. Retrieve the `top_k` nearest chunks.
//! 3. Join their texts into a context block and dedup their citations.
//! 4. Call the generator once with the fixed prompt template.
//!
//! Scope-resolution "not found" errors and invalid input propagate. Every
//! other failure is logged and turned into [`Answer::degraded`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{RagError, RagResult};
use crate::generation::{create_generator, Generator};
use crate::loader;
use crate::models::{Answer, IngestReport, IngestStatus, RetrievalResult};
use crate::session::{
    upload_name, validate_session_id, IndexScope, SessionScopeResolver, SessionStorage,
};
use crate::store::{SqliteIndex, VectorIndex};

/// Number of chunks retrieved per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 5;

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "[user] Answer the question based on the context.\n\nContext:\n{}\n\nQuestion: {} [assistant]",
        context, question
    )
}

/// Totals from a folder ingest.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FolderIngestSummary {
    pub files_seen: usize,
    pub inserted: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    /// Files with no extractable text.
    pub no_text: usize,
    pub chunks_written: usize,
}

/// What a session deletion removed from the index side.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionDeletion {
    pub session_id: String,
    pub folder_removed: bool,
    pub records_removed: u64,
    /// Records of documents another session still holds, handed over to it.
    pub records_retained: u64,
}

pub struct RagPipeline {
    global: Arc<SqliteIndex>,
    resolver: SessionScopeResolver,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl RagPipeline {
    pub fn new(
        global: Arc<SqliteIndex>,
        storage: Arc<SessionStorage>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            resolver: SessionScopeResolver::new(Arc::clone(&global), storage),
            global,
            generator,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.resolver = self.resolver.with_batch_size(batch_size);
        self
    }

    /// Open the global index and construct every backend named in `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let batch_size = config.embedding.batch_size;

        let global = SqliteIndex::open(&config.db.path, embedder)
            .await?
            .with_batch_size(batch_size);
        let storage =
            SessionStorage::new(&config.storage.source_data, &config.storage.include_globs)?;

        tracing::info!(
            embedder = %config.embedding.provider,
            generator = %config.generation.provider,
            top_k = config.retrieval.top_k,
            "pipeline ready"
        );

        Ok(Self::new(Arc::new(global), Arc::new(storage), generator)
            .with_top_k(config.retrieval.top_k)
            .with_batch_size(batch_size))
    }

    pub fn global_index(&self) -> &SqliteIndex {
        &self.global
    }

    pub fn storage(&self) -> &SessionStorage {
        self.resolver.storage()
    }

    /// Top-k chunks for `question` within `scope`, with deduplicated citations.
    pub async fn retrieve(&self, scope: &IndexScope, question: &str) -> RagResult<RetrievalResult> {
        let hits = scope.index().query(question, self.top_k).await?;
        tracing::debug!(
            session_id = scope.session_id().unwrap_or("global"),
            hits = hits.len(),
            "retrieved chunks"
        );
        Ok(RetrievalResult::new(hits))
    }

    /// Answer `question` from the global index or from one session's uploads.
    ///
    /// # Errors
    ///
    /// Only [`RagError::SessionNotFound`], [`RagError::NoDocuments`] and
    /// invalid-input errors are returned. Everything else yields
    /// `Ok(Answer::degraded())`.
    pub async fn answer(&self, question: &str, session_id: Option<&str>) -> RagResult<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        let scope = match self.resolver.resolve(session_id).await {
            Ok(scope) => scope,
            Err(e) if e.is_not_found() || e.is_bad_request() => {
                tracing::warn!(
                    session_id = session_id.unwrap_or("global"),
                    error = %e,
                    "scope resolution failed"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::error!(
                    session_id = session_id.unwrap_or("global"),
                    error = %e,
                    "failed to build session index; returning degraded answer"
                );
                return Ok(Answer::degraded());
            }
        };

        match self.generate(&scope, question).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!(
                    session_id = session_id.unwrap_or("global"),
                    question,
                    error = %e,
                    "query failed; returning degraded answer"
                );
                Ok(Answer::degraded())
            }
        }
    }

    async fn generate(&self, scope: &IndexScope, question: &str) -> RagResult<Answer> {
        let retrieval = self.retrieve(scope, question).await?;
        let prompt = build_prompt(&retrieval.context(), question);
        let answer = self.generator.generate(&prompt).await?;

        tracing::info!(
            session_id = scope.session_id().unwrap_or("global"),
            sources = retrieval.sources.len(),
            "answered question"
        );
        Ok(Answer {
            answer,
            sources: retrieval.sources,
        })
    }

    /// Store an uploaded PDF under its session and index it globally.
    ///
    /// A fresh session id is generated when none is given. The bytes are
    /// parsed before anything touches the session folder, so a file that
    /// fails to parse never replaces a stored one. Parsed files are always
    /// kept in the session folder, so session queries see them even when the
    /// global insert is skipped as a duplicate.
    pub async fn ingest_upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        session_id: Option<&str>,
    ) -> RagResult<IngestReport> {
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(RagError::InvalidUpload(format!(
                "only PDF files are accepted, got {:?}",
                filename
            )));
        }

        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        validate_session_id(&session_id)?;
        let source_filename = upload_name(filename)?;

        let loaded = loader::load_upload_async(bytes.clone(), source_filename.clone()).await?;
        self.storage().save_upload(&session_id, &source_filename, &bytes)?;
        drop(bytes);

        let chunks: Vec<_> = loaded
            .chunks
            .into_iter()
            .map(|mut c| {
                c.session_id = Some(session_id.clone());
                c
            })
            .collect();

        let status = if chunks.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                file = %source_filename,
                "no extractable text; nothing indexed"
            );
            IngestStatus::NoText
        } else if self.global.all_file_hashes().await.contains(&loaded.file_hash) {
            tracing::info!(
                session_id = %session_id,
                file = %source_filename,
                file_hash = %loaded.file_hash,
                "file already indexed; skipping insertion"
            );
            IngestStatus::SkippedDuplicate
        } else {
            self.global.insert(&chunks).await?;
            tracing::info!(
                session_id = %session_id,
                file = %source_filename,
                chunks = chunks.len(),
                "inserted chunks into global index"
            );
            IngestStatus::Inserted
        };

        Ok(IngestReport {
            session_id: Some(session_id),
            filename: source_filename,
            file_hash: loaded.file_hash,
            pages: chunks.len(),
            status,
        })
    }

    /// Ingest every matching file directly inside `dir` into the global index.
    ///
    /// Unparseable files are logged and counted as failed; the run continues.
    /// Files already present by `file_hash`, including earlier files of the
    /// same run, are skipped.
    pub async fn ingest_folder(&self, dir: &Path) -> RagResult<FolderIngestSummary> {
        if !dir.is_dir() {
            return Err(RagError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            )));
        }

        let files = self.storage().scan_dir(dir)?;
        let mut known: HashSet<String> = self.global.all_file_hashes().await;
        let mut summary = FolderIngestSummary {
            files_seen: files.len(),
            ..Default::default()
        };

        for path in files {
            let loaded = match loader::load_pdf_async(path.clone()).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file");
                    summary.failed += 1;
                    continue;
                }
            };

            if loaded.chunks.is_empty() {
                tracing::warn!(path = %path.display(), "no extractable text; skipping");
                summary.no_text += 1;
                continue;
            }
            if known.contains(&loaded.file_hash) {
                tracing::info!(
                    path = %path.display(),
                    file_hash = %loaded.file_hash,
                    "file already indexed; skipping"
                );
                summary.skipped_duplicate += 1;
                continue;
            }

            self.global.insert(&loaded.chunks).await?;
            summary.inserted += 1;
            summary.chunks_written += loaded.chunks.len();
            known.insert(loaded.file_hash);
        }

        tracing::info!(
            dir = %dir.display(),
            inserted = summary.inserted,
            skipped = summary.skipped_duplicate,
            failed = summary.failed,
            "folder ingest complete"
        );
        Ok(summary)
    }

    /// Remove a session's folder and the global records only it needs.
    ///
    /// A document inserted under this session may have been uploaded again
    /// elsewhere and skipped as a duplicate. Its records are handed over to
    /// the first other session folder that still holds it instead of being
    /// deleted.
    pub async fn delete_session(&self, session_id: &str) -> RagResult<SessionDeletion> {
        validate_session_id(session_id)?;
        let records_retained = self.hand_over_shared_records(session_id).await?;
        let folder_removed = self.storage().remove_session(session_id)?;
        let records_removed = self.global.delete_session(session_id).await?;
        Ok(SessionDeletion {
            session_id: session_id.to_string(),
            folder_removed,
            records_removed,
            records_retained,
        })
    }

    async fn hand_over_shared_records(&self, session_id: &str) -> RagResult<u64> {
        let mut owned = self.global.session_file_hashes(session_id).await?;
        let mut moved = 0;
        if owned.is_empty() {
            return Ok(moved);
        }

        for other in self.storage().list_sessions()? {
            if other == session_id {
                continue;
            }
            let docs = match self.storage().documents(&other) {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::debug!(session_id = %other, error = %e, "skipping session folder");
                    continue;
                }
            };
            for path in docs {
                let loaded = match loader::load_pdf_async(path).await {
                    Ok(loaded) => loaded,
                    Err(_) => continue,
                };
                if owned.remove(&loaded.file_hash) {
                    moved += self
                        .global
                        .reassign_file(&loaded.file_hash, session_id, &other)
                        .await?;
                    if owned.is_empty() {
                        return Ok(moved);
                    }
                }
            }
        }
        Ok(moved)
    }

    pub async fn close(&self) {
        self.global.close().await;
    }
}
