//! Unified store
//!
//! Single embedded sqlite file holding all pipeline state: files,
//! fingerprints, metadata, quality scores, duplicate groups, the
//! operation log, checkpoints, rejection entries, and settings.
//! Single-writer multi-reader via a small WAL-mode pool; foreign keys
//! enforced on every connection.

pub mod checkpoints;
pub mod files;
pub mod fingerprints;
pub mod groups;
pub mod metadata;
pub mod operations;
pub mod quality;
pub mod rejections;
pub mod schema;
pub mod settings;
pub mod targets;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default store file name under the workspace directory
pub const STORE_FILE_NAME: &str = "music_cleanup.db";

/// Typed store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Constraint violation; indicates a bug in the caller
    #[error("Store integrity violation: {0}")]
    Integrity(String),

    /// Disk or connection failure; fatal to the current transaction
    #[error("Store I/O failure: {0}")]
    Io(String),

    /// Lock contention; retried with backoff by the caller
    #[error("Store busy: {0}")]
    Busy(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let msg = db.message().to_string();
                if msg.contains("database is locked") || msg.contains("database table is locked") {
                    StoreError::Busy(msg)
                } else if msg.contains("FOREIGN KEY constraint failed")
                    || msg.contains("UNIQUE constraint failed")
                    || msg.contains("CHECK constraint failed")
                    || msg.contains("NOT NULL constraint failed")
                {
                    StoreError::Integrity(msg)
                } else {
                    StoreError::Io(msg)
                }
            }
            _ => StoreError::Io(err.to_string()),
        }
    }
}

impl StoreError {
    /// True for errors worth retrying with backoff
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Open (creating if needed) the unified store and bring its schema
/// up to the current version. Legacy per-concern stores found next to
/// the unified file are folded in and archived.
pub async fn init_store(store_path: &Path) -> StoreResult<SqlitePool> {
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(store_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    // Writes are serialized by sqlite itself; a small pool keeps readers
    // from queueing behind the writer.
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    schema::migrate(&pool).await?;
    schema::merge_legacy_stores(&pool, store_path).await?;

    tracing::info!(path = %store_path.display(), "Unified store ready");
    Ok(pool)
}

/// In-memory store for tests
pub async fn init_store_in_memory() -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    schema::migrate(&pool).await?;
    Ok(pool)
}
