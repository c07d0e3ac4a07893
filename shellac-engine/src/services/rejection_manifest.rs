//! Rejection manifest
//!
//! The audit trail for everything kept out of the organized tree. The
//! store rows are authoritative; JSON and CSV sidecars inside the
//! rejected root are regenerated wholesale on demand, so re-exporting is
//! idempotent. Restoration runs through the transaction manager and
//! removes the audit entry only after the file is back in place.

use crate::db::files::FileStatus;
use crate::db::rejections::RejectionRow;
use crate::db::{self, StoreError};
use crate::services::transaction_manager::{
    hash_path, StagedOp, TransactionManager, TxnError,
};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_JSON: &str = "rejected_manifest.json";
pub const ANALYSIS_CSV: &str = "rejection_analysis.csv";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error("Rejection entry {0} not found")]
    EntryNotFound(i64),

    #[error("Rejected file missing or altered: {0}")]
    RejectedFileInvalid(String),

    #[error("Export failed: {0}")]
    Export(String),
}

pub struct RejectionManifest {
    pool: SqlitePool,
    rejected_root: PathBuf,
}

impl RejectionManifest {
    pub fn new(pool: SqlitePool, rejected_root: PathBuf) -> Self {
        Self {
            pool,
            rejected_root,
        }
    }

    /// Regenerate both sidecar views from the store
    pub async fn export(&self) -> Result<usize, ManifestError> {
        let entries = db::rejections::load_all(&self.pool).await?;

        std::fs::create_dir_all(&self.rejected_root)
            .map_err(|e| ManifestError::Export(e.to_string()))?;

        self.write_atomic(
            &self.rejected_root.join(MANIFEST_JSON),
            &serde_json::to_vec_pretty(&entries).map_err(|e| ManifestError::Export(e.to_string()))?,
        )?;
        self.write_atomic(
            &self.rejected_root.join(ANALYSIS_CSV),
            csv_view(&entries).as_bytes(),
        )?;

        tracing::info!(
            entries = entries.len(),
            root = %self.rejected_root.display(),
            "Rejection manifest exported"
        );
        Ok(entries.len())
    }

    /// Put a rejected file back at its original path.
    ///
    /// Verifies the rejected copy still matches the hash recorded at
    /// rejection time, copies it back, removes the rejected copy, marks
    /// the file healthy again, and deletes the audit entry.
    pub async fn restore(
        &self,
        txn_manager: &TransactionManager,
        entry_id: i64,
    ) -> Result<PathBuf, ManifestError> {
        let entry = db::rejections::load_by_id(&self.pool, entry_id)
            .await?
            .ok_or(ManifestError::EntryNotFound(entry_id))?;

        if db::operations::file_has_open_operations(&self.pool, entry.file_id).await? {
            return Err(ManifestError::RejectedFileInvalid(format!(
                "file {} has operations in flight",
                entry.file_id
            )));
        }

        let rejected = PathBuf::from(&entry.rejected_path);
        let original = PathBuf::from(&entry.original_path);

        if !rejected.exists() {
            return Err(ManifestError::RejectedFileInvalid(entry.rejected_path));
        }
        let actual = hash_path(rejected.clone()).await?;
        if let Some(expected) = &entry.content_hash {
            if &actual != expected {
                return Err(ManifestError::RejectedFileInvalid(format!(
                    "{} (hash changed since rejection)",
                    entry.rejected_path
                )));
            }
        }

        let txn_id = txn_manager.begin("restore rejected file").await?;
        if let Some(parent) = original.parent() {
            txn_manager
                .stage(txn_id, StagedOp::create_dir(parent))
                .await?;
        }
        txn_manager
            .stage(
                txn_id,
                StagedOp::copy(entry.file_id, &rejected, &original, &actual),
            )
            .await?;
        txn_manager
            .stage(
                txn_id,
                StagedOp::remove_source(entry.file_id, &rejected, &original, &actual),
            )
            .await?;
        txn_manager.execute(txn_id).await?;

        db::files::update_path(&self.pool, entry.file_id, &entry.original_path).await?;
        db::files::set_status(&self.pool, entry.file_id, FileStatus::Healthy).await?;
        db::rejections::delete(&self.pool, entry_id).await?;

        tracing::info!(
            entry_id,
            path = %original.display(),
            "Rejected file restored"
        );
        Ok(original)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), ManifestError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(|e| ManifestError::Export(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| ManifestError::Export(e.to_string()))?;
        Ok(())
    }
}

/// CSV rendering of the audit rows
fn csv_view(entries: &[RejectionRow]) -> String {
    let mut out = String::from(
        "id,category,original_path,rejected_path,chosen_file_id,group_id,reason,rejected_at\n",
    );
    for entry in entries {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            entry.id,
            entry.category.as_str(),
            csv_field(&entry.original_path),
            csv_field(&entry.rejected_path),
            entry
                .chosen_file_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            entry.group_id.map(|id| id.to_string()).unwrap_or_default(),
            csv_field(&entry.reason_text),
            csv_field(&entry.rejected_at),
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rejections::RejectionCategory;
    use crate::db::{files, init_store_in_memory, rejections};
    use crate::extractors::TagWriter;
    use crate::services::transaction_manager::hash_file_sync;
    use chrono::Utc;
    use std::sync::Arc;

    async fn seed_entry(pool: &SqlitePool, dir: &Path) -> (i64, PathBuf, PathBuf) {
        let original = dir.join("in").join("song.mp3");
        let rejected = dir.join("rej").join("duplicates").join("song_duplicate_2.mp3");
        std::fs::create_dir_all(rejected.parent().unwrap()).unwrap();
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&rejected, b"rejected bytes").unwrap();
        let hash = hash_file_sync(&rejected).unwrap();

        let file_id = files::upsert_discovered(pool, &original.to_string_lossy(), 14, Utc::now())
            .await
            .unwrap()
            .unwrap();
        files::set_status(pool, file_id, FileStatus::Rejected)
            .await
            .unwrap();

        let entry_id = rejections::append(
            pool,
            file_id,
            RejectionCategory::Duplicate,
            None,
            None,
            &rejected.to_string_lossy(),
            &original.to_string_lossy(),
            Some(&hash),
            "score 70.0 vs 90.0 for chosen file",
        )
        .await
        .unwrap();

        (entry_id, original, rejected)
    }

    #[tokio::test]
    async fn test_export_writes_both_sidecars() {
        let pool = init_store_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        seed_entry(&pool, dir.path()).await;

        let manifest = RejectionManifest::new(pool.clone(), dir.path().join("rej"));
        let count = manifest.export().await.unwrap();
        assert_eq!(count, 1);

        let json_path = dir.path().join("rej").join(MANIFEST_JSON);
        let csv_path = dir.path().join("rej").join(ANALYSIS_CSV);
        assert!(json_path.exists());
        assert!(csv_path.exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.lines().count() == 2);
        assert!(csv.contains("duplicate"));

        // Re-export is idempotent
        manifest.export().await.unwrap();
        let csv_again = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(csv, csv_again);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let pool = init_store_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (entry_id, original, rejected) = seed_entry(&pool, dir.path()).await;

        let manifest = RejectionManifest::new(pool.clone(), dir.path().join("rej"));
        let txn_manager = TransactionManager::new(
            pool.clone(),
            Vec::new(),
            Arc::new(TagWriter::new(Vec::new())),
            false,
        );

        let restored = manifest.restore(&txn_manager, entry_id).await.unwrap();
        assert_eq!(restored, original);
        assert!(original.exists());
        assert!(!rejected.exists());

        // Entry deleted, file healthy again at its original path
        assert!(rejections::load_by_id(&pool, entry_id).await.unwrap().is_none());
        let file = files::load_by_path(&pool, &original.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.status, FileStatus::Healthy);
    }

    #[tokio::test]
    async fn test_restore_refuses_altered_rejected_file() {
        let pool = init_store_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (entry_id, _original, rejected) = seed_entry(&pool, dir.path()).await;

        std::fs::write(&rejected, b"tampered").unwrap();

        let manifest = RejectionManifest::new(pool.clone(), dir.path().join("rej"));
        let txn_manager = TransactionManager::new(
            pool.clone(),
            Vec::new(),
            Arc::new(TagWriter::new(Vec::new())),
            false,
        );
        let result = manifest.restore(&txn_manager, entry_id).await;
        assert!(matches!(result, Err(ManifestError::RejectedFileInvalid(_))));
    }

    #[test]
    fn test_csv_escaping() {
        let field = csv_field("a \"quoted\", field");
        assert_eq!(field, "\"a \"\"quoted\"\", field\"");
        assert_eq!(csv_field("plain"), "plain");
    }

    #[tokio::test]
    async fn test_restore_unknown_entry() {
        let pool = init_store_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let manifest = RejectionManifest::new(pool.clone(), dir.path().to_path_buf());
        let txn_manager = TransactionManager::new(
            pool.clone(),
            Vec::new(),
            Arc::new(TagWriter::new(Vec::new())),
            false,
        );
        let result = manifest.restore(&txn_manager, 404).await;
        assert!(matches!(result, Err(ManifestError::EntryNotFound(404))));
    }
}
