//! Checkpoint rows
//!
//! Strictly increasing ids; recovery always uses the maximum id.

use super::StoreResult;
use crate::models::SessionCounters;
use shellac_common::events::Phase;
use sqlx::{Row, SqlitePool};

/// One recorded checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointRow {
    pub id: i64,
    pub phase: Phase,
    pub last_batch_id: i64,
    pub counters: SessionCounters,
    pub open_transaction_ids: Vec<i64>,
}

/// Append a checkpoint, returning its id
pub async fn write(
    pool: &SqlitePool,
    phase: Phase,
    last_batch_id: i64,
    counters: &SessionCounters,
    open_transaction_ids: &[i64],
) -> StoreResult<i64> {
    let counters_json = serde_json::to_string(counters)
        .map_err(|e| super::StoreError::Integrity(format!("Serialize counters: {}", e)))?;
    let txn_json = serde_json::to_string(open_transaction_ids)
        .map_err(|e| super::StoreError::Integrity(format!("Serialize txn ids: {}", e)))?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO checkpoints (phase, last_batch_id, counters, open_transaction_ids)
         VALUES (?, ?, ?, ?)
         RETURNING id",
    )
    .bind(phase.as_str())
    .bind(last_batch_id)
    .bind(&counters_json)
    .bind(&txn_json)
    .fetch_one(pool)
    .await?;

    tracing::debug!(checkpoint_id = id, phase = phase.as_str(), last_batch_id, "Checkpoint written");
    Ok(id)
}

/// The most recent checkpoint, if any
pub async fn latest(pool: &SqlitePool) -> StoreResult<Option<CheckpointRow>> {
    let row = sqlx::query(
        "SELECT id, phase, last_batch_id, counters, open_transaction_ids
         FROM checkpoints ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let phase_str: String = row.get("phase");
        let counters_json: String = row.get("counters");
        let txn_json: String = row.get("open_transaction_ids");

        Ok(CheckpointRow {
            id: row.get("id"),
            phase: Phase::parse(&phase_str).ok_or_else(|| {
                super::StoreError::Integrity(format!("Bad checkpoint phase: {}", phase_str))
            })?,
            last_batch_id: row.get("last_batch_id"),
            counters: serde_json::from_str(&counters_json).unwrap_or_default(),
            open_transaction_ids: serde_json::from_str(&txn_json).unwrap_or_default(),
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_store_in_memory;

    #[tokio::test]
    async fn test_latest_uses_maximum_id() {
        let pool = init_store_in_memory().await.unwrap();
        let counters = SessionCounters::default();

        let a = write(&pool, Phase::Discovery, 1, &counters, &[]).await.unwrap();
        let b = write(&pool, Phase::Analysis, 7, &counters, &[3]).await.unwrap();
        assert!(b > a);

        let latest = latest(&pool).await.unwrap().unwrap();
        assert_eq!(latest.id, b);
        assert_eq!(latest.phase, Phase::Analysis);
        assert_eq!(latest.last_batch_id, 7);
        assert_eq!(latest.open_transaction_ids, vec![3]);
    }

    #[tokio::test]
    async fn test_empty_store_has_no_checkpoint() {
        let pool = init_store_in_memory().await.unwrap();
        assert!(latest(&pool).await.unwrap().is_none());
    }
}
