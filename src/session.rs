//! Session storage and index-scope resolution.
//!
//! Every session owns a folder `<source_data>/<session_id>/` holding the raw
//! PDFs uploaded under it. A question asked within a session is answered
//! only from that folder: [`SessionScopeResolver::resolve`] re-parses the
//! folder and builds a fresh [`InMemoryIndex`] over exactly those chunks,
//! ignoring the global collection. Without a session the persistent
//! [`SqliteIndex`] is used.
//!
//! Session builds are request-local. Nothing is cached between queries, so
//! concurrent queries on one session never share a half-built index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{RagError, RagResult};
use crate::loader;
use crate::store::{InMemoryIndex, SqliteIndex, VectorIndex, DEFAULT_BATCH_SIZE};

/// Session ids are used as folder names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_session_id(session_id: &str) -> RagResult<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidSessionId(session_id.to_string()))
    }
}

/// Basename of an uploaded file name, rejecting names with none.
pub fn upload_name(filename: &str) -> RagResult<String> {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RagError::InvalidUpload(format!("no file name in {:?}", filename)))
}

/// Durable per-session document folders under a single root.
pub struct SessionStorage {
    root: PathBuf,
    include: GlobSet,
}

impl SessionStorage {
    pub fn new(root: impl Into<PathBuf>, include_globs: &[String]) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_globs {
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
        }
        Ok(Self {
            root: root.into(),
            include: builder.build()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> RagResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    /// Write an uploaded file into the session folder, creating it on first use.
    ///
    /// Only the basename of `filename` is kept. The bytes are written to a
    /// hidden temporary file and renamed into place, so an existing file with
    /// the same name is replaced only by a complete write.
    pub fn save_upload(&self, session_id: &str, filename: &str, bytes: &[u8]) -> RagResult<PathBuf> {
        let name = upload_name(filename)?;
        let dir = self.session_dir(session_id)?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(&name);
        let staging = dir.join(format!(".{}.{}.part", name, uuid::Uuid::new_v4()));

        if let Err(e) = std::fs::write(&staging, bytes).and_then(|_| std::fs::rename(&staging, &path)) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }

        tracing::info!(session_id, path = %path.display(), bytes = bytes.len(), "stored upload");
        Ok(path)
    }

    /// Documents currently stored for a session, sorted by file name.
    ///
    /// Fails with [`RagError::SessionNotFound`] if the folder is missing or
    /// empty. Files not matching the include globs are ignored, so the
    /// result may be empty even when the folder is not.
    pub fn documents(&self, session_id: &str) -> RagResult<Vec<PathBuf>> {
        let dir = self.session_dir(session_id)?;
        let has_entries = dir.is_dir() && std::fs::read_dir(&dir)?.next().is_some();
        if !has_entries {
            tracing::warn!(session_id, "no source data found for session");
            return Err(RagError::SessionNotFound(session_id.to_string()));
        }

        self.scan_dir(&dir)
    }

    /// Files directly inside `dir` that match the include globs, sorted by name.
    pub fn scan_dir(&self, dir: &Path) -> RagResult<Vec<PathBuf>> {
        let mut docs = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| RagError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self.include.is_match(&name) {
                docs.push(entry.into_path());
            } else {
                tracing::warn!(path = %entry.path().display(), "skipping unsupported file");
            }
        }
        Ok(docs)
    }

    /// Ids of every session folder present, sorted.
    pub fn list_sessions(&self) -> RagResult<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Remove a session folder and everything in it. Returns whether it existed.
    pub fn remove_session(&self, session_id: &str) -> RagResult<bool> {
        let dir = self.session_dir(session_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        tracing::info!(session_id, path = %dir.display(), "removed session folder");
        Ok(true)
    }
}

/// The index a query runs against.
pub enum IndexScope {
    Global(Arc<SqliteIndex>),
    Session {
        session_id: String,
        index: InMemoryIndex,
    },
}

impl IndexScope {
    pub fn index(&self) -> &dyn VectorIndex {
        match self {
            IndexScope::Global(index) => index.as_ref(),
            IndexScope::Session { index, .. } => index,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            IndexScope::Global(_) => None,
            IndexScope::Session { session_id, .. } => Some(session_id),
        }
    }
}

pub struct SessionScopeResolver {
    global: Arc<SqliteIndex>,
    storage: Arc<SessionStorage>,
    batch_size: usize,
}

impl SessionScopeResolver {
    pub fn new(global: Arc<SqliteIndex>, storage: Arc<SessionStorage>) -> Self {
        Self {
            global,
            storage,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    /// Map an optional session id to the index scope to query.
    ///
    /// # Errors
    ///
    /// - [`RagError::SessionNotFound`]: folder missing or empty.
    /// - [`RagError::NoDocuments`]: re-parsing the folder yielded no chunks.
    /// - [`RagError::LoadFailure`] / [`RagError::EmbeddingFailure`]: a stored
    ///   file could not be parsed, or the scope could not be embedded.
    pub async fn resolve(&self, session_id: Option<&str>) -> RagResult<IndexScope> {
        let Some(session_id) = session_id else {
            tracing::info!("using global index");
            return Ok(IndexScope::Global(Arc::clone(&self.global)));
        };

        let documents = self.storage.documents(session_id)?;
        tracing::info!(session_id, files = documents.len(), "building index from session folder");

        let mut chunks = Vec::new();
        for path in documents {
            let loaded = loader::load_pdf_async(path).await?;
            chunks.extend(loaded.chunks.into_iter().map(|mut c| {
                c.session_id = Some(session_id.to_string());
                c
            }));
        }

        if chunks.is_empty() {
            tracing::warn!(session_id, "no valid documents found in session");
            return Err(RagError::NoDocuments(session_id.to_string()));
        }

        let index =
            InMemoryIndex::from_chunks(self.global.embedder(), &chunks, self.batch_size).await?;
        Ok(IndexScope::Session {
            session_id: session_id.to_string(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path) -> SessionStorage {
        SessionStorage::new(root, &["*.pdf".to_string()]).unwrap()
    }

    #[test]
    fn session_id_validation() {
        assert!(validate_session_id("s1").is_ok());
        assert!(validate_session_id("3f2b6c1e-9a7d-4c1b-8e2f-0a1b2c3d4e5f").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("with space").is_err());
    }

    #[test]
    fn missing_folder_is_session_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = storage(dir.path()).documents("nope").unwrap_err();
        assert!(matches!(err, RagError::SessionNotFound(_)));
    }

    #[test]
    fn empty_folder_is_session_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("s1")).unwrap();
        let err = storage(dir.path()).documents("s1").unwrap_err();
        assert!(matches!(err, RagError::SessionNotFound(_)));
    }

    #[test]
    fn documents_filters_and_sorts() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = storage(dir.path());
        store.save_upload("s1", "b.pdf", b"%PDF").unwrap();
        store.save_upload("s1", "a.pdf", b"%PDF").unwrap();
        store.save_upload("s1", "C.PDF", b"%PDF").unwrap();
        store.save_upload("s1", "notes.txt", b"hello").unwrap();

        let names: Vec<String> = store
            .documents("s1")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["C.PDF", "a.pdf", "b.pdf"]);
    }

    #[test]
    fn upload_keeps_only_basename() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = storage(dir.path());
        let path = store.save_upload("s1", "../../escape.pdf", b"%PDF").unwrap();
        assert_eq!(path, dir.path().join("s1").join("escape.pdf"));
        assert!(store.save_upload("../x", "a.pdf", b"%PDF").is_err());
    }

    #[test]
    fn upload_replaces_existing_file_without_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = storage(dir.path());
        store.save_upload("s1", "a.pdf", b"first").unwrap();
        let path = store.save_upload("s1", "a.pdf", b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(dir.path().join("s1")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn list_and_remove_sessions() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = storage(dir.path());
        assert!(store.list_sessions().unwrap().is_empty());

        store.save_upload("s2", "a.pdf", b"%PDF").unwrap();
        store.save_upload("s1", "a.pdf", b"%PDF").unwrap();
        assert_eq!(store.list_sessions().unwrap(), vec!["s1", "s2"]);

        assert!(store.remove_session("s1").unwrap());
        assert!(!store.remove_session("s1").unwrap());
        assert_eq!(store.list_sessions().unwrap(), vec!["s2"]);
    }
}
