//! Atomic transaction manager
//!
//! Guarantees that a set of filesystem operations either all reach their
//! target state or none do. Protocol: begin -> stage (log rows, status
//! pending) -> prepare (verify sources, hashes, destinations) -> perform
//! (temp file + fsync + atomic rename, in staged order) -> commit.
//! Any failure after prepare rolls performed operations back in inverse
//! order using the log. A transaction found open or committing at
//! startup is rolled back the same way.
//!
//! A copy never removes its source. A move is staged as a copy followed
//! by a separate remove-source operation that re-verifies the
//! destination hash before touching the source.

use crate::db::operations::{self, OpKind, OpStatus, OperationRow, TxnStatus};
use crate::db::{self, StoreError};
use crate::extractors::{MetadataWriter, ScoreTags};
use shellac_common::config::IntegrityLevel;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Protected path may not be written: {0}")]
    ProtectedPath(String),

    #[error("Prepare failed: {0}")]
    Prepare(String),

    #[error("Perform failed: {0}")]
    Perform(String),

    #[error("Hash mismatch at {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Rollback incomplete: {0}")]
    Rollback(String),
}

/// An operation to stage into a transaction
#[derive(Debug, Clone)]
pub struct StagedOp {
    pub kind: OpKind,
    pub file_id: Option<i64>,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub source_hash: Option<String>,
}

impl StagedOp {
    pub fn create_dir(path: &Path) -> Self {
        Self {
            kind: OpKind::CreateDir,
            file_id: None,
            source: path.to_path_buf(),
            destination: Some(path.to_path_buf()),
            source_hash: None,
        }
    }

    pub fn copy(file_id: i64, source: &Path, destination: &Path, hash: &str) -> Self {
        Self {
            kind: OpKind::Copy,
            file_id: Some(file_id),
            source: source.to_path_buf(),
            destination: Some(destination.to_path_buf()),
            source_hash: Some(hash.to_string()),
        }
    }

    /// Remove-source step of a move; verifies `destination` still carries
    /// `hash` before the source is touched
    pub fn remove_source(file_id: i64, source: &Path, destination: &Path, hash: &str) -> Self {
        Self {
            kind: OpKind::Move,
            file_id: Some(file_id),
            source: source.to_path_buf(),
            destination: Some(destination.to_path_buf()),
            source_hash: Some(hash.to_string()),
        }
    }

    pub fn link(file_id: i64, source: &Path, destination: &Path, hash: &str) -> Self {
        Self {
            kind: OpKind::Link,
            file_id: Some(file_id),
            source: source.to_path_buf(),
            destination: Some(destination.to_path_buf()),
            source_hash: Some(hash.to_string()),
        }
    }

    pub fn rename(file_id: i64, source: &Path, destination: &Path) -> Self {
        Self {
            kind: OpKind::Rename,
            file_id: Some(file_id),
            source: source.to_path_buf(),
            destination: Some(destination.to_path_buf()),
            source_hash: None,
        }
    }

    /// Stamp scoring tags onto `path` (always a file this transaction created)
    pub fn write_tag(file_id: i64, path: &Path) -> Self {
        Self {
            kind: OpKind::WriteTag,
            file_id: Some(file_id),
            source: path.to_path_buf(),
            destination: None,
            source_hash: None,
        }
    }
}

pub struct TransactionManager {
    pool: SqlitePool,
    protected_roots: Vec<PathBuf>,
    metadata_writer: Arc<dyn MetadataWriter>,
    dry_run: bool,
    integrity: IntegrityLevel,
}

impl TransactionManager {
    pub fn new(
        pool: SqlitePool,
        protected_roots: Vec<PathBuf>,
        metadata_writer: Arc<dyn MetadataWriter>,
        dry_run: bool,
    ) -> Self {
        Self {
            pool,
            protected_roots,
            metadata_writer,
            dry_run,
            integrity: IntegrityLevel::Checksum,
        }
    }

    /// Copy verification depth; `Basic` trusts the filesystem, `Deep`
    /// and above re-hash the destination after the rename
    pub fn with_integrity(mut self, integrity: IntegrityLevel) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Step 1: open a transaction
    pub async fn begin(&self, reason: &str) -> Result<i64, TxnError> {
        let txn_id = operations::create_transaction(&self.pool, reason).await?;
        tracing::debug!(txn_id, reason, "Transaction opened");
        Ok(txn_id)
    }

    /// Step 2: append an operation to the log
    pub async fn stage(&self, txn_id: i64, op: StagedOp) -> Result<i64, TxnError> {
        if let Some(dest) = &op.destination {
            if self.is_protected(dest) {
                return Err(TxnError::ProtectedPath(dest.display().to_string()));
            }
        }
        // Kinds that mutate their source must not touch protected files
        let mutates_source = matches!(op.kind, OpKind::Move | OpKind::Rename | OpKind::WriteTag);
        if mutates_source && self.is_protected(&op.source) {
            return Err(TxnError::ProtectedPath(op.source.display().to_string()));
        }

        let op_id = operations::stage_operation(
            &self.pool,
            txn_id,
            op.file_id,
            op.kind,
            &op.source.to_string_lossy(),
            op.destination.as_ref().map(|d| d.to_string_lossy()).as_deref(),
            op.source_hash.as_deref(),
        )
        .await?;
        Ok(op_id)
    }

    /// Steps 3-5: prepare, perform, commit; roll back on any failure.
    /// In dry-run mode the staged rows stay pending for inspection and
    /// nothing touches the filesystem.
    pub async fn execute(&self, txn_id: i64) -> Result<(), TxnError> {
        if self.dry_run {
            tracing::info!(txn_id, "Dry run: transaction staged only");
            return Ok(());
        }

        if let Err(e) = self.prepare(txn_id).await {
            // Nothing performed yet; the transaction just closes
            operations::set_transaction_status(&self.pool, txn_id, TxnStatus::RolledBack).await?;
            return Err(e);
        }

        if let Err(e) = self.perform(txn_id).await {
            self.rollback(txn_id).await?;
            return Err(e);
        }

        self.commit(txn_id).await
    }

    /// Step 3: verify every pending operation is performable
    pub async fn prepare(&self, txn_id: i64) -> Result<(), TxnError> {
        let ops = operations::load_operations_by_status(&self.pool, txn_id, OpStatus::Pending).await?;

        for op in &ops {
            match op.kind {
                OpKind::CreateDir => {}
                OpKind::WriteTag => {
                    let source = Path::new(&op.source_path);
                    if !source.exists() {
                        // The file this transaction will create; verified by
                        // op ordering at perform time
                        continue;
                    }
                }
                OpKind::Copy | OpKind::Link | OpKind::Rename | OpKind::Move => {
                    let source = Path::new(&op.source_path);
                    if !source.exists() {
                        return Err(TxnError::Prepare(format!(
                            "Source missing: {}",
                            op.source_path
                        )));
                    }

                    // The source must still be the bytes we analyzed
                    if op.kind == OpKind::Copy || op.kind == OpKind::Link {
                        if let Some(expected) = &op.source_hash {
                            let actual = hash_path(source.to_path_buf()).await?;
                            if &actual != expected {
                                return Err(TxnError::Prepare(format!(
                                    "Source changed since analysis: {}",
                                    op.source_path
                                )));
                            }
                        }
                    }

                    if let Some(dest) = &op.destination_path {
                        let dest = Path::new(dest);
                        if op.kind != OpKind::Move && dest.exists() {
                            // Conflicts are resolved at planning time; an
                            // identical file is the idempotent skip case
                            if let Some(expected) = &op.source_hash {
                                let actual = hash_path(dest.to_path_buf()).await?;
                                if &actual != expected {
                                    return Err(TxnError::Prepare(format!(
                                        "Destination occupied by different content: {}",
                                        dest.display()
                                    )));
                                }
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(txn_id, ops = ops.len(), "Transaction prepared");
        Ok(())
    }

    /// Step 4: execute pending operations in staged order
    async fn perform(&self, txn_id: i64) -> Result<(), TxnError> {
        let ops = operations::load_operations_by_status(&self.pool, txn_id, OpStatus::Pending).await?;

        for op in ops {
            operations::mark_op_started(&self.pool, op.id).await?;
            match self.perform_one(&op).await {
                Ok(Performed::Done) => {
                    operations::set_op_status(&self.pool, op.id, OpStatus::Performed).await?;
                }
                Ok(Performed::Skipped) => {
                    operations::set_op_performed_with_note(&self.pool, op.id, SKIP_NOTE).await?;
                }
                Err(e) => {
                    operations::mark_op_failed(&self.pool, op.id, &e.to_string()).await?;
                    tracing::error!(txn_id, op_id = op.id, error = %e, "Operation failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn perform_one(&self, op: &OperationRow) -> Result<Performed, TxnError> {
        let source = PathBuf::from(&op.source_path);
        let destination = op.destination_path.as_ref().map(PathBuf::from);

        match op.kind {
            OpKind::CreateDir => {
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || {
                    std::fs::create_dir_all(&dest).map_err(io_perform)?;
                    Ok(Performed::Done)
                })
                .await
            }
            OpKind::Copy => {
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                let expected = match self.integrity {
                    IntegrityLevel::Basic => None,
                    _ => op.source_hash.clone(),
                };
                let reverify = matches!(
                    self.integrity,
                    IntegrityLevel::Deep | IntegrityLevel::Paranoid
                );
                run_blocking(move || {
                    let performed = copy_with_verify(&source, &dest, expected.as_deref())?;
                    if reverify {
                        if let Some(expected) = expected.as_deref() {
                            let actual = hash_file_sync(&dest).map_err(io_perform)?;
                            if actual != expected {
                                return Err(TxnError::HashMismatch {
                                    path: dest.display().to_string(),
                                    expected: expected.to_string(),
                                    actual,
                                });
                            }
                        }
                    }
                    Ok(performed)
                })
                .await
            }
            OpKind::Move => {
                // Remove-source step: only after the destination is verified
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                let expected = op
                    .source_hash
                    .clone()
                    .ok_or_else(|| TxnError::Perform("Move op without hash".to_string()))?;
                run_blocking(move || {
                    let actual = hash_file_sync(&dest).map_err(io_perform)?;
                    if actual != expected {
                        return Err(TxnError::HashMismatch {
                            path: dest.display().to_string(),
                            expected,
                            actual,
                        });
                    }
                    std::fs::remove_file(&source).map_err(io_perform)?;
                    Ok(Performed::Done)
                })
                .await
            }
            OpKind::Link => {
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || {
                    if dest.exists() {
                        return Ok(Performed::Skipped);
                    }
                    std::fs::hard_link(&source, &dest).map_err(io_perform)?;
                    Ok(Performed::Done)
                })
                .await
            }
            OpKind::Rename => {
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent).map_err(io_perform)?;
                    }
                    std::fs::rename(&source, &dest).map_err(io_perform)?;
                    Ok(Performed::Done)
                })
                .await
            }
            OpKind::WriteTag => {
                let file_id = op
                    .file_id
                    .ok_or_else(|| TxnError::Perform("write-tag without file".to_string()))?;
                let quality = db::quality::load_by_file(&self.pool, file_id)
                    .await?
                    .ok_or_else(|| TxnError::Perform("write-tag without analysis".to_string()))?;
                let tags = ScoreTags {
                    grade: quality.grade.as_str().to_string(),
                    final_score: quality.final_score,
                };
                let writer = self.metadata_writer.clone();
                run_blocking(move || {
                    writer
                        .write(&source, &tags)
                        .map_err(|e| TxnError::Perform(e.to_string()))?;
                    Ok(Performed::Done)
                })
                .await
            }
        }
    }

    /// Step 5: make the transaction visible atomically
    async fn commit(&self, txn_id: i64) -> Result<(), TxnError> {
        operations::set_transaction_status(&self.pool, txn_id, TxnStatus::Committing).await?;
        operations::commit_performed_ops(&self.pool, txn_id).await?;
        operations::set_transaction_status(&self.pool, txn_id, TxnStatus::Committed).await?;
        tracing::debug!(txn_id, "Transaction committed");
        Ok(())
    }

    /// Step 6: reverse performed operations in inverse order
    pub async fn rollback(&self, txn_id: i64) -> Result<(), TxnError> {
        operations::set_transaction_status(&self.pool, txn_id, TxnStatus::RollingBack).await?;

        let mut performed =
            operations::load_operations_by_status(&self.pool, txn_id, OpStatus::Performed).await?;
        performed.reverse();

        let mut failures = Vec::new();
        for op in performed {
            match self.reverse_one(&op).await {
                Ok(()) => {
                    operations::set_op_status(&self.pool, op.id, OpStatus::RolledBack).await?;
                }
                Err(e) => {
                    tracing::error!(txn_id, op_id = op.id, error = %e, "Reverse failed");
                    operations::mark_op_failed(&self.pool, op.id, &format!("rollback: {}", e))
                        .await?;
                    failures.push(op.id);
                }
            }
        }

        // Pending ops never ran; close them out too
        let pending =
            operations::load_operations_by_status(&self.pool, txn_id, OpStatus::Pending).await?;
        for op in pending {
            operations::set_op_status(&self.pool, op.id, OpStatus::RolledBack).await?;
        }

        operations::set_transaction_status(&self.pool, txn_id, TxnStatus::RolledBack).await?;

        if failures.is_empty() {
            tracing::info!(txn_id, "Transaction rolled back");
            Ok(())
        } else {
            Err(TxnError::Rollback(format!(
                "{} operations could not be reversed",
                failures.len()
            )))
        }
    }

    async fn reverse_one(&self, op: &OperationRow) -> Result<(), TxnError> {
        let source = PathBuf::from(&op.source_path);
        let destination = op.destination_path.as_ref().map(PathBuf::from);

        match op.kind {
            OpKind::CreateDir => {
                // Only remove if we left it empty
                if let Some(dest) = destination {
                    run_blocking(move || {
                        let _ = std::fs::remove_dir(&dest);
                        Ok(())
                    })
                    .await
                } else {
                    Ok(())
                }
            }
            OpKind::Copy | OpKind::Link => {
                // A skipped op did not create the destination; leave it alone
                if op.error.as_deref() == Some(SKIP_NOTE) {
                    return Ok(());
                }
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || {
                    if dest.exists() {
                        std::fs::remove_file(&dest).map_err(io_perform)?;
                    }
                    Ok(())
                })
                .await
            }
            OpKind::Move => {
                // Source was removed; restore it from the verified destination
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || copy_with_verify(&dest, &source, None).map(|_| ())).await
            }
            OpKind::Rename => {
                let dest = destination.ok_or_else(|| missing_dest(op))?;
                run_blocking(move || std::fs::rename(&dest, &source).map_err(io_perform)).await
            }
            // Tags were written onto a file this transaction created; the
            // file itself is removed by reversing its copy
            OpKind::WriteTag => Ok(()),
        }
    }

    /// Roll back every transaction a crashed run left unfinished
    pub async fn recover(&self) -> Result<Vec<i64>, TxnError> {
        let unfinished = operations::unfinished_transactions(&self.pool).await?;
        for txn_id in &unfinished {
            tracing::warn!(txn_id, "Recovering unfinished transaction");
            self.rollback(*txn_id).await?;
        }
        Ok(unfinished)
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected_roots.iter().any(|root| path.starts_with(root))
    }
}

/// Note stored on performed ops that were idempotent skips
const SKIP_NOTE: &str = "skipped: destination identical";

/// Whether a perform step actually mutated the filesystem
enum Performed {
    Done,
    Skipped,
}

fn missing_dest(op: &OperationRow) -> TxnError {
    TxnError::Perform(format!("Operation {} has no destination", op.id))
}

fn io_perform(e: std::io::Error) -> TxnError {
    TxnError::Perform(e.to_string())
}

async fn run_blocking<T, F>(f: F) -> Result<T, TxnError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TxnError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TxnError::Perform(format!("Blocking task failed: {}", e)))?
}

/// Copy via sibling temp file, fsync, atomic rename. When `expected` is
/// given the temp copy's hash is verified before the rename; an existing
/// identical destination is the idempotent skip case.
fn copy_with_verify(
    source: &Path,
    dest: &Path,
    expected: Option<&str>,
) -> Result<Performed, TxnError> {
    if dest.exists() {
        if let Some(expected) = expected {
            let actual = hash_file_sync(dest).map_err(io_perform)?;
            if actual == expected {
                tracing::debug!(dest = %dest.display(), "Destination identical, skipping copy");
                return Ok(Performed::Skipped);
            }
        }
        return Err(TxnError::Perform(format!(
            "Destination exists: {}",
            dest.display()
        )));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_perform)?;
    }

    let tmp = temp_sibling(dest);
    let result = (|| -> Result<Performed, TxnError> {
        std::fs::copy(source, &tmp).map_err(io_perform)?;

        if let Some(expected) = expected {
            let actual = hash_file_sync(&tmp).map_err(io_perform)?;
            if actual != expected {
                return Err(TxnError::HashMismatch {
                    path: tmp.display().to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let file = std::fs::File::open(&tmp).map_err(io_perform)?;
        file.sync_all().map_err(io_perform)?;
        drop(file);

        std::fs::rename(&tmp, dest).map_err(io_perform)?;

        // Durability of the rename itself; failure here is tolerable
        if let Some(parent) = dest.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(Performed::Done)
    })();

    if result.is_err() && tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "op".to_string());
    name.push_str(".part");
    dest.with_file_name(name)
}

/// Streamed SHA-256, blocking
pub fn hash_file_sync(path: &Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Streamed SHA-256 on the blocking pool
pub async fn hash_path(path: PathBuf) -> Result<String, TxnError> {
    tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(|e| TxnError::Perform(format!("Hash task failed: {}", e)))?
        .map_err(|e| TxnError::Perform(e.to_string()))
}
