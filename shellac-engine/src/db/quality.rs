//! Quality analysis rows
//!
//! One row per analyzed file; replaced wholesale on re-analysis. Besides
//! the weighted breakdown this carries the raw filter inputs (health
//! score, ratios, duration) so the corruption filter and any re-score
//! run on recorded facts, not on a fresh decode.

use super::StoreResult;
use crate::models::quality::{Grade, RecommendedAction};
use sqlx::{Row, SqlitePool};

/// Persisted quality breakdown for one file
#[derive(Debug, Clone)]
pub struct QualityRow {
    pub id: i64,
    pub file_id: i64,
    pub technical_score: f64,
    pub audio_fidelity_score: f64,
    pub integrity_score: f64,
    pub reference_score: Option<f64>,
    pub final_score: f64,
    pub grade: Grade,
    pub recommended_action: RecommendedAction,
    pub defects: Vec<String>,
    pub health_score: i64,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
    pub duration_sec: Option<f64>,
}

/// Insert or replace the analysis for a file
pub async fn upsert(pool: &SqlitePool, row: &QualityRow) -> StoreResult<i64> {
    let defects_json = serde_json::to_string(&row.defects)
        .map_err(|e| super::StoreError::Integrity(format!("Serialize defects: {}", e)))?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO quality_analyses
         (file_id, technical_score, audio_fidelity_score, integrity_score,
          reference_score, final_score, grade, recommended_action, defects,
          health_score, clipping_ratio, silence_ratio, duration_sec)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(file_id) DO UPDATE SET
            technical_score = excluded.technical_score,
            audio_fidelity_score = excluded.audio_fidelity_score,
            integrity_score = excluded.integrity_score,
            reference_score = excluded.reference_score,
            final_score = excluded.final_score,
            grade = excluded.grade,
            recommended_action = excluded.recommended_action,
            defects = excluded.defects,
            health_score = excluded.health_score,
            clipping_ratio = excluded.clipping_ratio,
            silence_ratio = excluded.silence_ratio,
            duration_sec = excluded.duration_sec
         RETURNING id",
    )
    .bind(row.file_id)
    .bind(row.technical_score)
    .bind(row.audio_fidelity_score)
    .bind(row.integrity_score)
    .bind(row.reference_score)
    .bind(row.final_score)
    .bind(row.grade.as_str())
    .bind(row.recommended_action.as_str())
    .bind(&defects_json)
    .bind(row.health_score)
    .bind(row.clipping_ratio)
    .bind(row.silence_ratio)
    .bind(row.duration_sec)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn load_by_file(pool: &SqlitePool, file_id: i64) -> StoreResult<Option<QualityRow>> {
    let row = sqlx::query(
        "SELECT id, file_id, technical_score, audio_fidelity_score, integrity_score,
                reference_score, final_score, grade, recommended_action, defects,
                health_score, clipping_ratio, silence_ratio, duration_sec
         FROM quality_analyses WHERE file_id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let grade_str: String = row.get("grade");
        let action_str: String = row.get("recommended_action");
        let defects_json: String = row.get("defects");
        let defects: Vec<String> = serde_json::from_str(&defects_json).unwrap_or_default();

        Ok(QualityRow {
            id: row.get("id"),
            file_id: row.get("file_id"),
            technical_score: row.get("technical_score"),
            audio_fidelity_score: row.get("audio_fidelity_score"),
            integrity_score: row.get("integrity_score"),
            reference_score: row.get("reference_score"),
            final_score: row.get("final_score"),
            grade: Grade::parse(&grade_str)
                .ok_or_else(|| super::StoreError::Integrity(format!("Bad grade: {}", grade_str)))?,
            recommended_action: RecommendedAction::parse(&action_str).ok_or_else(|| {
                super::StoreError::Integrity(format!("Bad action: {}", action_str))
            })?,
            defects,
            health_score: row.get("health_score"),
            clipping_ratio: row.get("clipping_ratio"),
            silence_ratio: row.get("silence_ratio"),
            duration_sec: row.get("duration_sec"),
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{files, init_store_in_memory};
    use chrono::Utc;

    fn sample_row(file_id: i64) -> QualityRow {
        QualityRow {
            id: 0,
            file_id,
            technical_score: 100.0,
            audio_fidelity_score: 90.0,
            integrity_score: 100.0,
            reference_score: None,
            final_score: 88.0,
            grade: Grade::AMinus,
            recommended_action: RecommendedAction::Keep,
            defects: vec![],
            health_score: 100,
            clipping_ratio: Some(0.0),
            silence_ratio: Some(0.02),
            duration_sec: Some(215.0),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_reanalysis() {
        let pool = init_store_in_memory().await.unwrap();
        let file_id = files::upsert_discovered(&pool, "/m/a.flac", 10, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let mut row = sample_row(file_id);
        upsert(&pool, &row).await.unwrap();

        row.final_score = 91.5;
        row.grade = Grade::A;
        row.defects = vec!["clipping".to_string()];
        row.health_score = 80;
        upsert(&pool, &row).await.unwrap();

        let loaded = load_by_file(&pool, file_id).await.unwrap().unwrap();
        assert_eq!(loaded.final_score, 91.5);
        assert_eq!(loaded.grade, Grade::A);
        assert_eq!(loaded.defects, vec!["clipping".to_string()]);
        assert_eq!(loaded.health_score, 80);
        assert_eq!(loaded.duration_sec, Some(215.0));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quality_analyses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_cascade_on_file_delete() {
        let pool = init_store_in_memory().await.unwrap();
        let file_id = files::upsert_discovered(&pool, "/m/b.mp3", 10, Utc::now())
            .await
            .unwrap()
            .unwrap();
        upsert(&pool, &sample_row(file_id)).await.unwrap();

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(load_by_file(&pool, file_id).await.unwrap().is_none());
    }
}
