//! Rejection audit rows
//!
//! Append-only record of every file kept out of the organized tree:
//! which sibling won, why, and where the rejected copy lives so it can
//! be restored later.

use super::{StoreError, StoreResult};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// Why the file was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    Duplicate,
    LowQuality,
    Corrupted,
    Unsupported,
    InvalidMetadata,
    Error,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::Duplicate => "duplicate",
            RejectionCategory::LowQuality => "low_quality",
            RejectionCategory::Corrupted => "corrupted",
            RejectionCategory::Unsupported => "unsupported",
            RejectionCategory::InvalidMetadata => "invalid_metadata",
            RejectionCategory::Error => "error",
        }
    }

    pub fn parse(s: &str) -> StoreResult<RejectionCategory> {
        match s {
            "duplicate" => Ok(RejectionCategory::Duplicate),
            "low_quality" => Ok(RejectionCategory::LowQuality),
            "corrupted" => Ok(RejectionCategory::Corrupted),
            "unsupported" => Ok(RejectionCategory::Unsupported),
            "invalid_metadata" => Ok(RejectionCategory::InvalidMetadata),
            "error" => Ok(RejectionCategory::Error),
            other => Err(StoreError::Integrity(format!(
                "Unknown rejection category: {}",
                other
            ))),
        }
    }
}

/// One audit entry
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRow {
    pub id: i64,
    pub file_id: i64,
    pub category: RejectionCategory,
    pub chosen_file_id: Option<i64>,
    pub group_id: Option<i64>,
    pub rejected_path: String,
    pub original_path: String,
    pub content_hash: Option<String>,
    pub reason_text: String,
    pub rejected_at: String,
}

/// Append an entry, returning its id
#[allow(clippy::too_many_arguments)]
pub async fn append(
    pool: &SqlitePool,
    file_id: i64,
    category: RejectionCategory,
    chosen_file_id: Option<i64>,
    group_id: Option<i64>,
    rejected_path: &str,
    original_path: &str,
    content_hash: Option<&str>,
    reason_text: &str,
) -> StoreResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO rejection_entries
         (file_id, category, chosen_file_id, group_id, rejected_path,
          original_path, content_hash, reason_text)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(file_id)
    .bind(category.as_str())
    .bind(chosen_file_id)
    .bind(group_id)
    .bind(rejected_path)
    .bind(original_path)
    .bind(content_hash)
    .bind(reason_text)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

fn row_from(row: &sqlx::sqlite::SqliteRow) -> StoreResult<RejectionRow> {
    let category_str: String = row.get("category");
    Ok(RejectionRow {
        id: row.get("id"),
        file_id: row.get("file_id"),
        category: RejectionCategory::parse(&category_str)?,
        chosen_file_id: row.get("chosen_file_id"),
        group_id: row.get("group_id"),
        rejected_path: row.get("rejected_path"),
        original_path: row.get("original_path"),
        content_hash: row.get("content_hash"),
        reason_text: row.get("reason_text"),
        rejected_at: row.get("rejected_at"),
    })
}

const SELECT: &str = "SELECT id, file_id, category, chosen_file_id, group_id, rejected_path, \
                      original_path, content_hash, reason_text, rejected_at FROM rejection_entries";

pub async fn load_all(pool: &SqlitePool) -> StoreResult<Vec<RejectionRow>> {
    let rows = sqlx::query(&format!("{} ORDER BY id", SELECT))
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_from).collect()
}

pub async fn load_by_id(pool: &SqlitePool, id: i64) -> StoreResult<Option<RejectionRow>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_from).transpose()
}

/// Remove an entry after a successful restore
pub async fn delete(pool: &SqlitePool, id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM rejection_entries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &SqlitePool) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rejection_entries")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
