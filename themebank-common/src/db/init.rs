//! Database initialization
//!
//! Opens (creating on first run) the SQLite ledger and makes sure its
//! tables and indexes exist. Safe to call repeatedly.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open the ledger database at `db_path`, creating file and schema if needed
pub async fn init_ledger_database(db_path: &Path, busy_timeout: Duration) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets readers proceed while one claim transaction holds the write lock
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new ledger: {}", db_path.display());
    } else {
        info!("Opened existing ledger: {}", db_path.display());
    }

    create_audio_hashes_table(&pool).await?;
    create_used_urls_table(&pool).await?;

    Ok(pool)
}

async fn create_audio_hashes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audio_hashes (
            hash TEXT PRIMARY KEY,
            file_path TEXT,
            url TEXT,
            created_at TEXT NOT NULL,
            metadata TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audio_hashes_created ON audio_hashes(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_used_urls_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS used_urls (
            url TEXT PRIMARY KEY,
            normalized_url TEXT NOT NULL,
            video_id TEXT,
            created_at TEXT NOT NULL,
            title TEXT,
            search_term TEXT,
            theme_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Second line of defense behind the check-and-insert transaction
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_used_urls_normalized ON used_urls(normalized_url)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_used_urls_video_id ON used_urls(video_id) WHERE video_id IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_used_urls_created ON used_urls(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
