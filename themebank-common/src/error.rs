//! Common error types for themebank

use thiserror::Error;

/// Common result type for themebank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the themebank crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Audio could not be decoded, rendered or written
    #[error("Audio error: {0}")]
    Audio(String),

    /// External tool or service failed (search/download tool, embedding service)
    #[error("External error: {0}")]
    External(String),

    /// Serialization of a sidecar, progress snapshot or event failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention ("database is locked" / "database is busy")
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}
