//! One-time import of legacy JSON registries
//!
//! Older installs kept `audio_hashes.json` (array of `{hash, timestamp, ...}`)
//! and `used_urls.json` (array of URL strings) next to the store. They are
//! folded into the ledger with INSERT OR IGNORE and renamed to
//! `*.json.imported` so the import never runs twice. Nothing here can fail
//! `Ledger::open`: problems are logged and skipped.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use themebank_common::Result;
use tracing::{info, warn};

use super::{normalize, timestamp_at};

pub(crate) const LEGACY_HASHES_FILE: &str = "audio_hashes.json";
pub(crate) const LEGACY_URLS_FILE: &str = "used_urls.json";

pub(crate) async fn import_legacy_files(pool: &SqlitePool, dir: &Path) {
    let hashes_path = dir.join(LEGACY_HASHES_FILE);
    if hashes_path.exists() {
        match import_hashes(pool, &hashes_path).await {
            Ok(count) => {
                info!(path = %hashes_path.display(), imported = count, "Imported legacy hash registry");
                mark_imported(&hashes_path);
            }
            Err(e) => warn!(path = %hashes_path.display(), error = %e, "Legacy hash import failed"),
        }
    }

    let urls_path = dir.join(LEGACY_URLS_FILE);
    if urls_path.exists() {
        match import_urls(pool, &urls_path).await {
            Ok(count) => {
                info!(path = %urls_path.display(), imported = count, "Imported legacy URL registry");
                mark_imported(&urls_path);
            }
            Err(e) => warn!(path = %urls_path.display(), error = %e, "Legacy URL import failed"),
        }
    }
}

async fn import_hashes(pool: &SqlitePool, path: &Path) -> Result<u64> {
    let entries: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut tx = pool.begin().await?;
    let mut imported = 0;

    for entry in &entries {
        let Some(hash) = entry.get("hash").and_then(Value::as_str) else {
            continue;
        };
        let created_at = entry
            .get("timestamp")
            .and_then(parse_legacy_timestamp)
            .unwrap_or_else(Utc::now);

        let result = sqlx::query(
            "INSERT OR IGNORE INTO audio_hashes (hash, created_at, metadata) VALUES (?, ?, ?)",
        )
        .bind(hash)
        .bind(timestamp_at(created_at))
        .bind(entry.to_string())
        .execute(&mut *tx)
        .await?;
        imported += result.rows_affected();
    }

    tx.commit().await?;
    Ok(imported)
}

async fn import_urls(pool: &SqlitePool, path: &Path) -> Result<u64> {
    let entries: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut tx = pool.begin().await?;
    let mut imported = 0;
    let now = timestamp_at(Utc::now());

    for url in entries.iter().filter_map(Value::as_str) {
        let normalized = normalize(url);
        let result = sqlx::query(
            "INSERT OR IGNORE INTO used_urls (url, normalized_url, video_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(url)
        .bind(&normalized.url)
        .bind(normalized.video_id.as_deref())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        imported += result.rows_affected();
    }

    tx.commit().await?;
    Ok(imported)
}

/// Accepts epoch seconds, RFC 3339, or a naive ISO timestamp (taken as UTC)
fn parse_legacy_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_f64() {
        return Utc.timestamp_opt(secs as i64, 0).single();
    }
    let text = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn mark_imported(path: &Path) {
    let mut renamed = path.as_os_str().to_owned();
    renamed.push(".imported");
    if let Err(e) = std::fs::rename(path, &renamed) {
        warn!(path = %path.display(), error = %e, "Could not rename imported legacy file");
    }
}
