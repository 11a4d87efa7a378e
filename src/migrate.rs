//! Idempotent schema creation for the record and chat-history databases.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::RagResult;

/// Create both databases and their tables. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> RagResult<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate_records(&pool).await?;
    pool.close().await;

    let pool = db::connect(&config.history.path).await?;
    migrate_history(&pool).await?;
    pool.close().await;

    Ok(())
}

/// Schema of the persistent vector collection.
///
/// `id` increases with insertion order and breaks similarity ties.
pub async fn migrate_records(pool: &SqlitePool) -> RagResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            filename TEXT NOT NULL,
            page INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            session_id TEXT,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_file_hash ON records(file_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_session_id ON records(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_history(pool: &SqlitePool) -> RagResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            session_name TEXT,
            query TEXT NOT NULL,
            response TEXT NOT NULL,
            sources TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}
