//! Deduplication ledger
//!
//! Durable registry of every source URL/video id ever claimed and every
//! audio content hash ever accepted. It is the single source of truth for
//! "has this been consumed before", shared by all fetch tasks and by any
//! other process pointed at the same store.
//!
//! Claims (`add_url_if_absent`, `add_hash_if_absent`) run check-then-insert
//! inside one `BEGIN IMMEDIATE` transaction, so of N concurrent claimers for
//! the same identity exactly one sees `true`. Storage failures fail closed:
//! the claim reports `false` and the caller treats the item as taken.

mod legacy;
pub mod normalize;

pub use normalize::{normalize, NormalizedUrl};

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use themebank_common::db::init_ledger_database;
use themebank_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::utils::{begin_immediate, retry_on_lock};

/// Ledger store tuning
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// SQLite busy timeout per statement
    pub busy_timeout: Duration,
    /// Total time a claim keeps retrying lock contention before failing closed
    pub max_lock_wait_ms: u64,
    /// Directory searched for legacy JSON registries (`None` = ledger's directory)
    pub legacy_dir: Option<PathBuf>,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
            max_lock_wait_ms: 30_000,
            legacy_dir: None,
        }
    }
}

/// Row counts reported by [`Ledger::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub hash_count: u64,
    pub url_count: u64,
    pub platform_id_count: u64,
}

/// Stored record for a claimed URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlRecord {
    pub url: String,
    pub normalized_url: String,
    pub video_id: Option<String>,
    pub created_at: String,
    pub title: Option<String>,
    pub search_term: Option<String>,
    pub theme_name: Option<String>,
}

/// Rows removed by [`Ledger::prune_older_than`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub hashes_removed: u64,
    pub urls_removed: u64,
}

#[derive(Debug, Clone)]
struct UrlClaim {
    url: String,
    normalized: NormalizedUrl,
    title: Option<String>,
    search_term: Option<String>,
    theme_name: Option<String>,
}

#[derive(Debug, Clone)]
struct HashClaim {
    hash: String,
    file_path: Option<String>,
    url: Option<String>,
    metadata: Option<String>,
}

/// Handle to the ledger store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path` with default options
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, LedgerOptions::default()).await
    }

    /// Open the ledger, then import any legacy JSON registries once
    pub async fn open_with(path: &Path, options: LedgerOptions) -> Result<Self> {
        let pool = init_ledger_database(path, options.busy_timeout).await?;

        let legacy_dir = options
            .legacy_dir
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf));
        if let Some(dir) = legacy_dir {
            legacy::import_legacy_files(&pool, &dir).await;
        }

        Ok(Self {
            pool,
            max_lock_wait_ms: options.max_lock_wait_ms,
        })
    }

    /// Close the underlying pool. Further calls fail.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Ledger closed");
    }

    /// True if the URL's video id (when extractable), normalized form or raw
    /// form is already recorded
    pub async fn has_url(&self, url: &str) -> Result<bool> {
        let normalized = normalize(url);

        if let Some(video_id) = normalized.video_id.as_deref() {
            if self.has_video_id(video_id).await? {
                return Ok(true);
            }
        }

        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM used_urls WHERE normalized_url = ? OR url = ? LIMIT 1",
        )
        .bind(&normalized.url)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// True if a URL with this platform video id is recorded
    pub async fn has_video_id(&self, video_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM used_urls WHERE video_id = ? LIMIT 1")
                .bind(video_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Atomically claim a URL. `true` only for the caller that inserted it.
    pub async fn add_url_if_absent(
        &self,
        url: &str,
        title: Option<&str>,
        search_term: Option<&str>,
        theme_name: Option<&str>,
    ) -> bool {
        let claim = UrlClaim {
            url: url.to_string(),
            normalized: normalize(url),
            title: title.map(str::to_string),
            search_term: search_term.map(str::to_string),
            theme_name: theme_name.map(str::to_string),
        };
        let pool = self.pool.clone();

        let result = retry_on_lock("ledger::add_url", self.max_lock_wait_ms, move || {
            let pool = pool.clone();
            let claim = claim.clone();
            async move { claim_url(&pool, &claim).await }
        })
        .await;

        match result {
            Ok(inserted) => {
                debug!(url, inserted, "URL claim");
                inserted
            }
            Err(e) => {
                warn!(url, error = %e, "URL claim failed, treating as already used");
                false
            }
        }
    }

    /// True if the content hash is recorded
    pub async fn has_hash(&self, hash: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM audio_hashes WHERE hash = ? LIMIT 1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Atomically claim a content hash. `true` only for the caller that inserted it.
    pub async fn add_hash_if_absent(
        &self,
        hash: &str,
        file_path: Option<&Path>,
        url: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> bool {
        let claim = HashClaim {
            hash: hash.to_string(),
            file_path: file_path.map(|p| p.display().to_string()),
            url: url.map(str::to_string),
            metadata: metadata.map(|m| m.to_string()),
        };
        let pool = self.pool.clone();

        let result = retry_on_lock("ledger::add_hash", self.max_lock_wait_ms, move || {
            let pool = pool.clone();
            let claim = claim.clone();
            async move { claim_hash(&pool, &claim).await }
        })
        .await;

        match result {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(hash, error = %e, "Hash claim failed, treating as duplicate");
                false
            }
        }
    }

    /// Row counts
    pub async fn stats(&self) -> Result<LedgerStats> {
        let (hash_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio_hashes")
            .fetch_one(&self.pool)
            .await?;
        let (url_count, platform_id_count): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(video_id) FROM used_urls")
                .fetch_one(&self.pool)
                .await?;

        Ok(LedgerStats {
            hash_count: hash_count as u64,
            url_count: url_count as u64,
            platform_id_count: platform_id_count as u64,
        })
    }

    /// Stored record for a URL, looked up by video id, normalized or raw form
    pub async fn get_url_info(&self, url: &str) -> Result<Option<UrlRecord>> {
        let normalized = normalize(url);

        type Row = (
            String,
            String,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
        );

        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT url, normalized_url, video_id, created_at, title, search_term, theme_name
            FROM used_urls
            WHERE (video_id IS NOT NULL AND video_id = ?) OR normalized_url = ? OR url = ?
            LIMIT 1
            "#,
        )
        .bind(normalized.video_id.as_deref())
        .bind(&normalized.url)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(url, normalized_url, video_id, created_at, title, search_term, theme_name)| {
                UrlRecord {
                    url,
                    normalized_url,
                    video_id,
                    created_at,
                    title,
                    search_term,
                    theme_name,
                }
            },
        ))
    }

    /// Delete hash and URL rows older than `days` days
    pub async fn prune_older_than(&self, days: u32) -> Result<PruneReport> {
        let cutoff = timestamp_at(Utc::now() - ChronoDuration::days(i64::from(days)));

        let hashes = sqlx::query("DELETE FROM audio_hashes WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        let urls = sqlx::query("DELETE FROM used_urls WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;

        let report = PruneReport {
            hashes_removed: hashes.rows_affected(),
            urls_removed: urls.rows_affected(),
        };
        info!(
            days,
            hashes_removed = report.hashes_removed,
            urls_removed = report.urls_removed,
            "Pruned ledger"
        );
        Ok(report)
    }
}

/// Ledger timestamp format (RFC 3339, second precision, `Z`), which sorts lexically
pub(crate) fn timestamp_at(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn claim_url(pool: &SqlitePool, claim: &UrlClaim) -> Result<bool> {
    let mut tx = begin_immediate(pool, "ledger::add_url").await?;

    match insert_url_unless_present(tx.conn(), claim).await {
        Ok(true) => {
            tx.commit().await?;
            Ok(true)
        }
        Ok(false) => {
            tx.rollback().await?;
            Ok(false)
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

async fn insert_url_unless_present(conn: &mut SqliteConnection, claim: &UrlClaim) -> Result<bool> {
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM used_urls
        WHERE (video_id IS NOT NULL AND video_id = ?) OR normalized_url = ? OR url = ?
        LIMIT 1
        "#,
    )
    .bind(claim.normalized.video_id.as_deref())
    .bind(&claim.normalized.url)
    .bind(&claim.url)
    .fetch_optional(&mut *conn)
    .await?;

    if existing.is_some() {
        return Ok(false);
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO used_urls (url, normalized_url, video_id, created_at, title, search_term, theme_name)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&claim.url)
    .bind(&claim.normalized.url)
    .bind(claim.normalized.video_id.as_deref())
    .bind(timestamp_at(Utc::now()))
    .bind(claim.title.as_deref())
    .bind(claim.search_term.as_deref())
    .bind(claim.theme_name.as_deref())
    .execute(&mut *conn)
    .await;

    unique_violation_as_false(inserted)
}

async fn claim_hash(pool: &SqlitePool, claim: &HashClaim) -> Result<bool> {
    let mut tx = begin_immediate(pool, "ledger::add_hash").await?;

    match insert_hash_unless_present(tx.conn(), claim).await {
        Ok(true) => {
            tx.commit().await?;
            Ok(true)
        }
        Ok(false) => {
            tx.rollback().await?;
            Ok(false)
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

async fn insert_hash_unless_present(
    conn: &mut SqliteConnection,
    claim: &HashClaim,
) -> Result<bool> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM audio_hashes WHERE hash = ? LIMIT 1")
            .bind(&claim.hash)
            .fetch_optional(&mut *conn)
            .await?;

    if existing.is_some() {
        return Ok(false);
    }

    let inserted = sqlx::query(
        "INSERT INTO audio_hashes (hash, file_path, url, created_at, metadata) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&claim.hash)
    .bind(claim.file_path.as_deref())
    .bind(claim.url.as_deref())
    .bind(timestamp_at(Utc::now()))
    .bind(claim.metadata.as_deref())
    .execute(&mut *conn)
    .await;

    unique_violation_as_false(inserted)
}

/// A unique-index rejection means another writer already holds the identity
fn unique_violation_as_false(
    result: std::result::Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
        Err(e) => Err(Error::Database(e)),
    }
}
