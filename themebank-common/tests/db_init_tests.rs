//! Tests for ledger database initialization

use std::time::Duration;
use tempfile::TempDir;
use themebank_common::db::init::init_ledger_database;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("ledger.db");

    let result = init_ledger_database(&db_path, Duration::from_secs(5)).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("ledger.db");

    let pool1 = init_ledger_database(&db_path, Duration::from_secs(5)).await.unwrap();
    sqlx::query(
        "INSERT INTO audio_hashes (hash, created_at) VALUES ('abc', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_ledger_database(&db_path, Duration::from_secs(5)).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audio_hashes")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive re-initialization");
}

#[tokio::test]
async fn test_unique_indexes_reject_duplicate_identity() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("ledger.db");
    let pool = init_ledger_database(&db_path, Duration::from_secs(5)).await.unwrap();

    sqlx::query(
        "INSERT INTO used_urls (url, normalized_url, video_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind("https://youtu.be/abc")
    .bind("https://www.youtube.com/watch?v=abc")
    .bind("abc")
    .bind("2024-01-01T00:00:00Z")
    .execute(&pool)
    .await
    .unwrap();

    // Different raw URL, same video id
    let second = sqlx::query(
        "INSERT INTO used_urls (url, normalized_url, video_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind("https://www.youtube.com/embed/abc")
    .bind("https://www.youtube.com/watch?v=abc2")
    .bind("abc")
    .bind("2024-01-01T00:00:00Z")
    .execute(&pool)
    .await;
    assert!(second.is_err(), "video id must be unique");

    // Rows without a video id do not collide with each other
    for url in ["https://example.com/a", "https://example.com/b"] {
        sqlx::query(
            "INSERT INTO used_urls (url, normalized_url, video_id, created_at) VALUES (?, ?, NULL, ?)",
        )
        .bind(url)
        .bind(url)
        .bind("2024-01-01T00:00:00Z")
        .execute(&pool)
        .await
        .unwrap();
    }
}
