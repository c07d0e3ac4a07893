//! Runtime-tunable settings stored alongside the pipeline state

use super::StoreResult;
use sqlx::SqlitePool;

pub async fn get(pool: &SqlitePool, key: &str) -> StoreResult<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Integer setting with a fallback default
pub async fn get_u64(pool: &SqlitePool, key: &str, default: u64) -> StoreResult<u64> {
    Ok(get(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_store_in_memory;

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let pool = init_store_in_memory().await.unwrap();
        set(&pool, "store_lock_wait_ms", "2500").await.unwrap();
        assert_eq!(get_u64(&pool, "store_lock_wait_ms", 5000).await.unwrap(), 2500);

        set(&pool, "store_lock_wait_ms", "9000").await.unwrap();
        assert_eq!(get_u64(&pool, "store_lock_wait_ms", 5000).await.unwrap(), 9000);
    }

    #[tokio::test]
    async fn test_missing_key_uses_default() {
        let pool = init_store_in_memory().await.unwrap();
        assert_eq!(get_u64(&pool, "nope", 42).await.unwrap(), 42);
        assert!(get(&pool, "nope").await.unwrap().is_none());
    }
}
