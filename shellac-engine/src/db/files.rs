//! File row operations
//!
//! Every file the pipeline touches has exactly one row here, keyed by
//! absolute path. Status drives the phase machinery: each phase consumes
//! rows in its input status and transitions them forward, which is what
//! makes restarts idempotent.

use super::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// File lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Discovered,
    Analyzed,
    Healthy,
    Quarantined,
    Organized,
    Rejected,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "discovered",
            FileStatus::Analyzed => "analyzed",
            FileStatus::Healthy => "healthy",
            FileStatus::Quarantined => "quarantined",
            FileStatus::Organized => "organized",
            FileStatus::Rejected => "rejected",
            FileStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StoreResult<FileStatus> {
        match s {
            "discovered" => Ok(FileStatus::Discovered),
            "analyzed" => Ok(FileStatus::Analyzed),
            "healthy" => Ok(FileStatus::Healthy),
            "quarantined" => Ok(FileStatus::Quarantined),
            "organized" => Ok(FileStatus::Organized),
            "rejected" => Ok(FileStatus::Rejected),
            "failed" => Ok(FileStatus::Failed),
            other => Err(StoreError::Integrity(format!(
                "Unknown file status: {}",
                other
            ))),
        }
    }
}

/// One row of the files table
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub absolute_path: String,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub modified_time: DateTime<Utc>,
    pub fingerprint_id: Option<i64>,
    pub metadata_id: Option<i64>,
    pub quality_score: Option<f64>,
    pub status: FileStatus,
    pub error: Option<String>,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<FileRecord> {
    let status_str: String = row.get("status");
    let mod_time_str: String = row.get("modified_time");
    let modified_time = DateTime::parse_from_rfc3339(&mod_time_str)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Integrity(format!("Bad modified_time: {}", e)))?;

    Ok(FileRecord {
        id: row.get("id"),
        absolute_path: row.get("absolute_path"),
        content_hash: row.get("content_hash"),
        size_bytes: row.get("size_bytes"),
        modified_time,
        fingerprint_id: row.get("fingerprint_id"),
        metadata_id: row.get("metadata_id"),
        quality_score: row.get("quality_score"),
        status: FileStatus::parse(&status_str)?,
        error: row.get("error"),
    })
}

const SELECT_COLUMNS: &str = "id, absolute_path, content_hash, size_bytes, modified_time, \
                              fingerprint_id, metadata_id, quality_score, status, error";

/// Insert a newly discovered file; an existing path is left untouched.
/// Returns the row id, or None when the path was already present.
pub async fn upsert_discovered(
    pool: &SqlitePool,
    absolute_path: &str,
    size_bytes: i64,
    modified_time: DateTime<Utc>,
) -> StoreResult<Option<i64>> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO files (absolute_path, size_bytes, modified_time)
         VALUES (?, ?, ?)",
    )
    .bind(absolute_path)
    .bind(size_bytes)
    .bind(modified_time.to_rfc3339())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(result.last_insert_rowid()))
}

/// Attach analysis results and move the file to `analyzed`
pub async fn attach_analysis(
    pool: &SqlitePool,
    file_id: i64,
    content_hash: &str,
    fingerprint_id: Option<i64>,
    metadata_id: Option<i64>,
    quality_score: f64,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE files
         SET content_hash = ?, fingerprint_id = ?, metadata_id = ?,
             quality_score = ?, status = 'analyzed', error = NULL
         WHERE id = ?",
    )
    .bind(content_hash)
    .bind(fingerprint_id)
    .bind(metadata_id)
    .bind(quality_score)
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition a file's status
pub async fn set_status(pool: &SqlitePool, file_id: i64, status: FileStatus) -> StoreResult<()> {
    sqlx::query("UPDATE files SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a file failed with its error kind; the batch continues without it
pub async fn mark_failed(pool: &SqlitePool, file_id: i64, error: &str) -> StoreResult<()> {
    sqlx::query("UPDATE files SET status = 'failed', error = ? WHERE id = ?")
        .bind(error)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Rewrite the path after a committed relocation
pub async fn update_path(pool: &SqlitePool, file_id: i64, new_path: &str) -> StoreResult<()> {
    sqlx::query("UPDATE files SET absolute_path = ? WHERE id = ?")
        .bind(new_path)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_by_id(pool: &SqlitePool, file_id: i64) -> StoreResult<Option<FileRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM files WHERE id = ?",
        SELECT_COLUMNS
    ))
    .bind(file_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn load_by_path(pool: &SqlitePool, path: &str) -> StoreResult<Option<FileRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM files WHERE absolute_path = ?",
        SELECT_COLUMNS
    ))
    .bind(path)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Next batch of files in the given status, keyset-paginated by id
pub async fn load_batch_by_status(
    pool: &SqlitePool,
    status: FileStatus,
    after_id: i64,
    limit: i64,
) -> StoreResult<Vec<FileRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM files WHERE status = ? AND id > ? ORDER BY id LIMIT ?",
        SELECT_COLUMNS
    ))
    .bind(status.as_str())
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

pub async fn count_by_status(pool: &SqlitePool, status: FileStatus) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Everything the grouper needs for one healthy file
#[derive(Debug, Clone)]
pub struct GroupingCandidate {
    pub file_id: i64,
    pub absolute_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub fingerprint: Option<String>,
    pub duration_sec: Option<f64>,
    pub codec: Option<String>,
    pub bitrate_kbps: Option<i64>,
    pub final_score: f64,
}

/// Healthy files joined with their fingerprint and quality rows
pub async fn load_grouping_candidates(pool: &SqlitePool) -> StoreResult<Vec<GroupingCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT f.id AS file_id, f.absolute_path, f.content_hash, f.size_bytes,
               fp.fingerprint, fp.duration_sec, fp.codec, fp.bitrate_kbps,
               q.final_score
        FROM files f
        LEFT JOIN fingerprints fp ON fp.id = f.fingerprint_id
        JOIN quality_analyses q ON q.file_id = f.id
        WHERE f.status = 'healthy' AND f.content_hash IS NOT NULL
        ORDER BY f.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| GroupingCandidate {
            file_id: row.get("file_id"),
            absolute_path: row.get("absolute_path"),
            content_hash: row.get("content_hash"),
            size_bytes: row.get("size_bytes"),
            fingerprint: row.get("fingerprint"),
            duration_sec: row.get("duration_sec"),
            codec: row.get("codec"),
            bitrate_kbps: row.get("bitrate_kbps"),
            final_score: row.get("final_score"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_store_in_memory;

    #[tokio::test]
    async fn test_upsert_ignores_duplicates() {
        let pool = init_store_in_memory().await.unwrap();
        let first = upsert_discovered(&pool, "/music/a.mp3", 1000, Utc::now())
            .await
            .unwrap();
        assert!(first.is_some());

        let second = upsert_discovered(&pool, "/music/a.mp3", 2000, Utc::now())
            .await
            .unwrap();
        assert!(second.is_none());

        // The original row is untouched
        let record = load_by_path(&pool, "/music/a.mp3").await.unwrap().unwrap();
        assert_eq!(record.size_bytes, 1000);
        assert_eq!(record.status, FileStatus::Discovered);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let pool = init_store_in_memory().await.unwrap();
        let id = upsert_discovered(&pool, "/music/b.flac", 5000, Utc::now())
            .await
            .unwrap()
            .unwrap();

        attach_analysis(&pool, id, "deadbeef", None, None, 87.5)
            .await
            .unwrap();
        let record = load_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Analyzed);
        assert_eq!(record.content_hash.as_deref(), Some("deadbeef"));
        assert_eq!(record.quality_score, Some(87.5));

        mark_failed(&pool, id, "hash: permission denied").await.unwrap();
        let record = load_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Failed);
        assert!(record.error.unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_batch_pagination_by_id() {
        let pool = init_store_in_memory().await.unwrap();
        for i in 0..5 {
            upsert_discovered(&pool, &format!("/music/{}.mp3", i), 100, Utc::now())
                .await
                .unwrap();
        }

        let first = load_batch_by_status(&pool, FileStatus::Discovered, 0, 3)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        let last_id = first.last().unwrap().id;
        let second = load_batch_by_status(&pool, FileStatus::Discovered, last_id, 3)
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }
}
