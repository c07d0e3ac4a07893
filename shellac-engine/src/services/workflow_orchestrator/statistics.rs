//! Run report
//!
//! Aggregates session counters with store-level counts into a single
//! serializable report, written as JSON into the workspace directory so
//! reporting layers can render it without touching the store.

use crate::db::files::FileStatus;
use crate::db::{self, StoreResult};
use crate::models::{CleanupSession, SessionCounters};
use serde::Serialize;
use shellac_common::config::CleanupConfig;
use sqlx::SqlitePool;

pub const REPORT_FILE_NAME: &str = "cleanup_report.json";

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub started_at: String,
    pub duration_seconds: u64,
    pub dry_run: bool,
    pub counters: SessionCounters,
    pub files_by_status: FilesByStatus,
    pub rejection_entries: i64,
    pub duplicate_groups: i64,
}

#[derive(Debug, Serialize)]
pub struct FilesByStatus {
    pub discovered: i64,
    pub analyzed: i64,
    pub healthy: i64,
    pub quarantined: i64,
    pub organized: i64,
    pub rejected: i64,
    pub failed: i64,
}

/// Collect the report from the store
pub async fn build_report(
    pool: &SqlitePool,
    config: &CleanupConfig,
    session: &CleanupSession,
) -> StoreResult<RunReport> {
    let files_by_status = FilesByStatus {
        discovered: db::files::count_by_status(pool, FileStatus::Discovered).await?,
        analyzed: db::files::count_by_status(pool, FileStatus::Analyzed).await?,
        healthy: db::files::count_by_status(pool, FileStatus::Healthy).await?,
        quarantined: db::files::count_by_status(pool, FileStatus::Quarantined).await?,
        organized: db::files::count_by_status(pool, FileStatus::Organized).await?,
        rejected: db::files::count_by_status(pool, FileStatus::Rejected).await?,
        failed: db::files::count_by_status(pool, FileStatus::Failed).await?,
    };

    let duplicate_groups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_groups")
        .fetch_one(pool)
        .await
        .map_err(db::StoreError::from)?;

    Ok(RunReport {
        session_id: session.session_id.to_string(),
        started_at: session.started_at.to_rfc3339(),
        duration_seconds: session.duration_seconds(),
        dry_run: config.dry_run,
        counters: session.counters.clone(),
        files_by_status,
        rejection_entries: db::rejections::count(pool).await?,
        duplicate_groups,
    })
}

/// Build and write the report JSON into the workspace directory
pub async fn write_report(
    pool: &SqlitePool,
    config: &CleanupConfig,
    session: &CleanupSession,
) -> anyhow::Result<RunReport> {
    let report = build_report(pool, config, session).await?;

    let path = config.workspace_dir.join(REPORT_FILE_NAME);
    let json = serde_json::to_vec_pretty(&report)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, &path)?;

    tracing::info!(path = %path.display(), "Run report written");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_store_in_memory;
    use chrono::Utc;

    #[tokio::test]
    async fn test_report_counts_by_status() {
        let pool = init_store_in_memory().await.unwrap();
        for (i, status) in [FileStatus::Organized, FileStatus::Organized, FileStatus::Failed]
            .iter()
            .enumerate()
        {
            let id = db::files::upsert_discovered(&pool, &format!("/m/{}.mp3", i), 1, Utc::now())
                .await
                .unwrap()
                .unwrap();
            db::files::set_status(&pool, id, *status).await.unwrap();
        }

        let config = CleanupConfig::default();
        let session = CleanupSession::new();
        let report = build_report(&pool, &config, &session).await.unwrap();
        assert_eq!(report.files_by_status.organized, 2);
        assert_eq!(report.files_by_status.failed, 1);
        assert_eq!(report.files_by_status.discovered, 0);
    }

    #[tokio::test]
    async fn test_write_report_is_atomic_and_valid_json() {
        let pool = init_store_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut config = CleanupConfig::default();
        config.workspace_dir = dir.path().to_path_buf();

        let session = CleanupSession::new();
        write_report(&pool, &config, &session).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(REPORT_FILE_NAME)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert!(parsed.get("counters").is_some());
        assert!(!dir.path().join("cleanup_report.json.tmp").exists());
    }
}
