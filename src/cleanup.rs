//! Session removal and unused-session cleanup.
//!
//! A session is "unused" when its folder exists under the storage root but
//! the history store holds no exchange for it. Real cleanups append one
//! `timestamp,session_id` row per removed session to a CSV audit log.

use std::fs::OpenOptions;
use std::path::Path;

use serde::Serialize;

use crate::error::RagResult;
use crate::history::HistoryStore;
use crate::pipeline::{RagPipeline, SessionDeletion};

/// Everything removed for one session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ForgottenSession {
    #[serde(flatten)]
    pub index: SessionDeletion,
    pub history_removed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub message: String,
    /// Sessions removed, or that would be removed on a dry run.
    pub sessions: Vec<String>,
}

/// Remove a session's folder, its global index records and its history.
pub async fn forget_session(
    pipeline: &RagPipeline,
    history: &HistoryStore,
    session_id: &str,
) -> RagResult<ForgottenSession> {
    let index = pipeline.delete_session(session_id).await?;
    let history_removed = history.delete_history(session_id).await?;
    Ok(ForgottenSession {
        index,
        history_removed,
    })
}

/// Remove every session folder that has no chat history.
///
/// Failures on individual sessions are logged and skipped. With `dry_run`
/// nothing is deleted and the audit log is not written.
pub async fn cleanup_unused_sessions(
    pipeline: &RagPipeline,
    history: &HistoryStore,
    log_path: &Path,
    dry_run: bool,
) -> RagResult<CleanupReport> {
    let with_history = history.session_ids().await?;
    let unused: Vec<String> = pipeline
        .storage()
        .list_sessions()?
        .into_iter()
        .filter(|id| !with_history.contains(id))
        .collect();

    if dry_run {
        for session_id in &unused {
            tracing::info!(session_id = %session_id, "[dry run] would delete unused session");
        }
        return Ok(CleanupReport {
            dry_run,
            message: format!("Simulated {} deletions.", unused.len()),
            sessions: unused,
        });
    }

    let mut deleted = Vec::new();
    for session_id in unused {
        match forget_session(pipeline, history, &session_id).await {
            Ok(_) => {
                tracing::info!(session_id = %session_id, "deleted unused session");
                deleted.push(session_id);
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "failed to clean up session");
            }
        }
    }

    if !deleted.is_empty() {
        write_cleanup_log(log_path, &deleted)?;
    }

    Ok(CleanupReport {
        dry_run,
        message: format!("Deleted {} unused session(s).", deleted.len()),
        sessions: deleted,
    })
}

/// Append `timestamp,session_id` rows, writing the header when the file is new.
pub fn write_cleanup_log(path: &Path, session_ids: &[String]) -> RagResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = csv::Writer::from_writer(file);
    if is_new {
        writer
            .write_record(["timestamp", "session_id"])
            .map_err(std::io::Error::from)?;
    }
    let timestamp = chrono::Utc::now().to_rfc3339();
    for session_id in session_ids {
        writer
            .write_record([timestamp.as_str(), session_id.as_str()])
            .map_err(std::io::Error::from)?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), sessions = session_ids.len(), "wrote cleanup log");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_header_written_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/cleanup_log.csv");

        write_cleanup_log(&path, &["s1".to_string()]).unwrap();
        write_cleanup_log(&path, &["s2".to_string(), "s3".to_string()]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, vec!["timestamp", "session_id"]);
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[1].to_string())
            .collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }
}
