//! Metadata rows
//!
//! Deduplicated by content: files carrying identical tags share one row.

use super::StoreResult;
use sqlx::{Row, SqlitePool};

/// Where the metadata came from, in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Tag,
    Service,
    FilenameParse,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::Tag => "tag",
            MetadataSource::Service => "service",
            MetadataSource::FilenameParse => "filename-parse",
        }
    }
}

/// One metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub id: i64,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub source: String,
}

/// Insert unless an identical row exists, returning the row id either way
pub async fn get_or_insert(pool: &SqlitePool, row: &MetadataRow) -> StoreResult<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM metadata
         WHERE artist IS ? AND title IS ? AND album IS ? AND year IS ?
           AND genre IS ? AND track_number IS ? AND disc_number IS ? AND source = ?
         LIMIT 1",
    )
    .bind(&row.artist)
    .bind(&row.title)
    .bind(&row.album)
    .bind(row.year)
    .bind(&row.genre)
    .bind(row.track_number)
    .bind(row.disc_number)
    .bind(&row.source)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO metadata
         (artist, title, album, year, genre, track_number, disc_number, source)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(&row.artist)
    .bind(&row.title)
    .bind(&row.album)
    .bind(row.year)
    .bind(&row.genre)
    .bind(row.track_number)
    .bind(row.disc_number)
    .bind(&row.source)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn load_by_id(pool: &SqlitePool, id: i64) -> StoreResult<Option<MetadataRow>> {
    let row = sqlx::query(
        "SELECT id, artist, title, album, year, genre, track_number, disc_number, source
         FROM metadata WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| MetadataRow {
        id: row.get("id"),
        artist: row.get("artist"),
        title: row.get("title"),
        album: row.get("album"),
        year: row.get("year"),
        genre: row.get("genre"),
        track_number: row.get("track_number"),
        disc_number: row.get("disc_number"),
        source: row.get("source"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_store_in_memory;

    fn sample() -> MetadataRow {
        MetadataRow {
            id: 0,
            artist: Some("Carl Craig".to_string()),
            title: Some("At Les".to_string()),
            album: Some("More Songs About Food".to_string()),
            year: Some(1997),
            genre: Some("techno".to_string()),
            track_number: Some(4),
            disc_number: None,
            source: "tag".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_content_shares_one_row() {
        let pool = init_store_in_memory().await.unwrap();
        let a = get_or_insert(&pool, &sample()).await.unwrap();
        let b = get_or_insert(&pool, &sample()).await.unwrap();
        assert_eq!(a, b);

        let mut different = sample();
        different.year = Some(1998);
        let c = get_or_insert(&pool, &different).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_null_fields_compare_equal() {
        let pool = init_store_in_memory().await.unwrap();
        let mut row = sample();
        row.album = None;
        row.disc_number = None;

        let a = get_or_insert(&pool, &row).await.unwrap();
        let b = get_or_insert(&pool, &row).await.unwrap();
        assert_eq!(a, b);
    }
}
