//! Organization target rows and the needs-review queue

use super::StoreResult;
use sqlx::{Row, SqlitePool};

/// Where a file was (or will be) placed in the organized tree
#[derive(Debug, Clone)]
pub struct TargetRow {
    pub id: i64,
    pub file_id: i64,
    pub genre: String,
    pub decade: String,
    pub final_path: String,
    pub pattern_used: String,
}

/// Record (or overwrite) a file's computed destination
pub async fn upsert(
    pool: &SqlitePool,
    file_id: i64,
    genre: &str,
    decade: &str,
    final_path: &str,
    pattern_used: &str,
) -> StoreResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO organization_targets (file_id, genre, decade, final_path, pattern_used)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(file_id) DO UPDATE SET
            genre = excluded.genre,
            decade = excluded.decade,
            final_path = excluded.final_path,
            pattern_used = excluded.pattern_used
         RETURNING id",
    )
    .bind(file_id)
    .bind(genre)
    .bind(decade)
    .bind(final_path)
    .bind(pattern_used)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn load_by_file(pool: &SqlitePool, file_id: i64) -> StoreResult<Option<TargetRow>> {
    let row = sqlx::query(
        "SELECT id, file_id, genre, decade, final_path, pattern_used
         FROM organization_targets WHERE file_id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| TargetRow {
        id: row.get("id"),
        file_id: row.get("file_id"),
        genre: row.get("genre"),
        decade: row.get("decade"),
        final_path: row.get("final_path"),
        pattern_used: row.get("pattern_used"),
    }))
}

/// Queue a file for operator review; duplicate reasons are collapsed
pub async fn queue_for_review(pool: &SqlitePool, file_id: i64, reason: &str) -> StoreResult<()> {
    sqlx::query("INSERT OR IGNORE INTO review_queue (file_id, reason) VALUES (?, ?)")
        .bind(file_id)
        .bind(reason)
        .execute(pool)
        .await?;
    Ok(())
}

/// (file_id, reason) pairs awaiting review, oldest first
pub async fn review_queue(pool: &SqlitePool) -> StoreResult<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT file_id, reason FROM review_queue ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("file_id"), row.get("reason")))
        .collect())
}
