//! Chat transcript persistence.
//!
//! One row per answered question in the `chat_history` table of its own
//! SQLite database. Sources are stored as the citation list joined with
//! `", "`, the same text shown to users.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::error::RagResult;
use crate::migrate;

/// Maximum length, in characters, of a session name derived from a query.
pub const SESSION_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRecord {
    pub id: i64,
    pub session_id: String,
    pub session_name: Option<String>,
    pub query: String,
    pub response: String,
    pub sources: String,
    pub created_at: i64,
}

/// Name used for a session when the caller gives none.
pub fn default_session_name(query: &str) -> String {
    query.trim().chars().take(SESSION_NAME_LEN).collect()
}

pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn open(path: &Path) -> RagResult<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_history(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Append one question/answer exchange and return the stored row.
    pub async fn save_chat(
        &self,
        session_id: &str,
        query: &str,
        response: &str,
        sources: &[String],
        session_name: Option<&str>,
    ) -> RagResult<ChatRecord> {
        let session_name = match session_name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => default_session_name(query),
        };
        let sources = sources.join(", ");
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO chat_history (session_id, session_name, query, response, sources, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(&session_name)
        .bind(query)
        .bind(response)
        .bind(&sources)
        .bind(now)
        .execute(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(session_id, error = %e, "failed to save chat"))?;

        tracing::info!(session_id, session_name = %session_name, "saved chat");
        Ok(ChatRecord {
            id: result.last_insert_rowid(),
            session_id: session_id.to_string(),
            session_name: Some(session_name),
            query: query.to_string(),
            response: response.to_string(),
            sources,
            created_at: now,
        })
    }

    /// Exchanges of one session, oldest first.
    pub async fn get_history(&self, session_id: &str) -> RagResult<Vec<ChatRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, session_name, query, response, sources, created_at
            FROM chat_history
            WHERE session_id = ?
            ORDER BY id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(session_id, records = rows.len(), "retrieved history");
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Every stored exchange, oldest first.
    pub async fn get_all_history(&self) -> RagResult<Vec<ChatRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, session_name, query, response, sources, created_at
            FROM chat_history
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Distinct session ids that have at least one exchange.
    pub async fn session_ids(&self) -> RagResult<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT session_id FROM chat_history")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Delete a session's exchanges. Returns the number removed.
    pub async fn delete_history(&self, session_id: &str) -> RagResult<u64> {
        let result = sqlx::query("DELETE FROM chat_history WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(session_id, removed = result.rows_affected(), "deleted chat history");
        Ok(result.rows_affected())
    }
}

fn row_to_record(row: &SqliteRow) -> ChatRecord {
    ChatRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        session_name: row.get("session_name"),
        query: row.get("query"),
        response: row.get("response"),
        sources: row.get("sources"),
        created_at: row.get("created_at"),
    }
}
