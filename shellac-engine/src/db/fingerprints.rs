//! Fingerprint rows
//!
//! Content-addressed by the fingerprint string: identical audio content
//! yields one shared row, referenced by any number of files.

use super::StoreResult;
use sqlx::{Row, SqlitePool};

/// One fingerprint row with its technical attributes
#[derive(Debug, Clone)]
pub struct FingerprintRow {
    pub id: i64,
    pub fingerprint: String,
    pub duration_sec: Option<f64>,
    pub sample_rate_hz: Option<i64>,
    pub bit_depth: Option<i64>,
    pub channels: Option<i64>,
    pub codec: Option<String>,
    pub bitrate_kbps: Option<i64>,
}

/// Insert the fingerprint if unseen, returning the row id either way
pub async fn get_or_insert(pool: &SqlitePool, row: &FingerprintRow) -> StoreResult<i64> {
    sqlx::query(
        "INSERT OR IGNORE INTO fingerprints
         (fingerprint, duration_sec, sample_rate_hz, bit_depth, channels, codec, bitrate_kbps)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.fingerprint)
    .bind(row.duration_sec)
    .bind(row.sample_rate_hz)
    .bind(row.bit_depth)
    .bind(row.channels)
    .bind(&row.codec)
    .bind(row.bitrate_kbps)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM fingerprints WHERE fingerprint = ?")
        .bind(&row.fingerprint)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn load_by_id(pool: &SqlitePool, id: i64) -> StoreResult<Option<FingerprintRow>> {
    let row = sqlx::query(
        "SELECT id, fingerprint, duration_sec, sample_rate_hz, bit_depth, channels, codec, bitrate_kbps
         FROM fingerprints WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| FingerprintRow {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        duration_sec: row.get("duration_sec"),
        sample_rate_hz: row.get("sample_rate_hz"),
        bit_depth: row.get("bit_depth"),
        channels: row.get("channels"),
        codec: row.get("codec"),
        bitrate_kbps: row.get("bitrate_kbps"),
    }))
}
