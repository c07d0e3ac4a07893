//! Operation log rows
//!
//! Append-only log of intended filesystem mutations, grouped into
//! transactions (operation groups). The log is written before anything
//! touches the filesystem, which is what makes rollback and crash
//! recovery possible. Rows are never deleted.

use super::{StoreError, StoreResult};
use sqlx::{Row, SqlitePool};

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Open,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Open => "open",
            TxnStatus::Committing => "committing",
            TxnStatus::Committed => "committed",
            TxnStatus::RollingBack => "rolling-back",
            TxnStatus::RolledBack => "rolled-back",
        }
    }

    pub fn parse(s: &str) -> StoreResult<TxnStatus> {
        match s {
            "open" => Ok(TxnStatus::Open),
            "committing" => Ok(TxnStatus::Committing),
            "committed" => Ok(TxnStatus::Committed),
            "rolling-back" => Ok(TxnStatus::RollingBack),
            "rolled-back" => Ok(TxnStatus::RolledBack),
            other => Err(StoreError::Integrity(format!("Unknown txn status: {}", other))),
        }
    }
}

/// Kind of staged filesystem mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Copy source to destination; source stays
    Copy,
    /// Remove the source after verifying the destination copy
    Move,
    /// Hard-link source at destination
    Link,
    /// Rewrite tags in place via temp + rename
    WriteTag,
    /// Create the destination directory chain
    CreateDir,
    /// Atomic rename of source to destination
    Rename,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Copy => "copy",
            OpKind::Move => "move",
            OpKind::Link => "link",
            OpKind::WriteTag => "write-tag",
            OpKind::CreateDir => "create-dir",
            OpKind::Rename => "rename",
        }
    }

    pub fn parse(s: &str) -> StoreResult<OpKind> {
        match s {
            "copy" => Ok(OpKind::Copy),
            "move" => Ok(OpKind::Move),
            "link" => Ok(OpKind::Link),
            "write-tag" => Ok(OpKind::WriteTag),
            "create-dir" => Ok(OpKind::CreateDir),
            "rename" => Ok(OpKind::Rename),
            other => Err(StoreError::Integrity(format!("Unknown op kind: {}", other))),
        }
    }
}

/// Individual operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Pending,
    Performed,
    Committed,
    RolledBack,
    Failed,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Pending => "pending",
            OpStatus::Performed => "performed",
            OpStatus::Committed => "committed",
            OpStatus::RolledBack => "rolled-back",
            OpStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StoreResult<OpStatus> {
        match s {
            "pending" => Ok(OpStatus::Pending),
            "performed" => Ok(OpStatus::Performed),
            "committed" => Ok(OpStatus::Committed),
            "rolled-back" => Ok(OpStatus::RolledBack),
            "failed" => Ok(OpStatus::Failed),
            other => Err(StoreError::Integrity(format!("Unknown op status: {}", other))),
        }
    }
}

/// One staged operation
#[derive(Debug, Clone)]
pub struct OperationRow {
    pub id: i64,
    pub file_id: Option<i64>,
    pub transaction_id: i64,
    pub kind: OpKind,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub source_hash: Option<String>,
    pub status: OpStatus,
    pub error: Option<String>,
}

fn op_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<OperationRow> {
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    Ok(OperationRow {
        id: row.get("id"),
        file_id: row.get("file_id"),
        transaction_id: row.get("transaction_id"),
        kind: OpKind::parse(&kind_str)?,
        source_path: row.get("source_path"),
        destination_path: row.get("destination_path"),
        source_hash: row.get("source_hash"),
        status: OpStatus::parse(&status_str)?,
        error: row.get("error"),
    })
}

/// Open a new transaction
pub async fn create_transaction(pool: &SqlitePool, reason: &str) -> StoreResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO operation_groups (status, reason) VALUES ('open', ?) RETURNING id",
    )
    .bind(reason)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn transaction_status(pool: &SqlitePool, txn_id: i64) -> StoreResult<TxnStatus> {
    let status: String = sqlx::query_scalar("SELECT status FROM operation_groups WHERE id = ?")
        .bind(txn_id)
        .fetch_one(pool)
        .await?;
    TxnStatus::parse(&status)
}

pub async fn set_transaction_status(
    pool: &SqlitePool,
    txn_id: i64,
    status: TxnStatus,
) -> StoreResult<()> {
    if status == TxnStatus::Committed {
        sqlx::query(
            "UPDATE operation_groups SET status = ?, committed_at = datetime('now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(txn_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query("UPDATE operation_groups SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(txn_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Append a pending operation to a transaction
#[allow(clippy::too_many_arguments)]
pub async fn stage_operation(
    pool: &SqlitePool,
    txn_id: i64,
    file_id: Option<i64>,
    kind: OpKind,
    source_path: &str,
    destination_path: Option<&str>,
    source_hash: Option<&str>,
) -> StoreResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO file_operations
         (transaction_id, file_id, kind, source_path, destination_path, source_hash)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(txn_id)
    .bind(file_id)
    .bind(kind.as_str())
    .bind(source_path)
    .bind(destination_path)
    .bind(source_hash)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Operations of a transaction in insertion (= execution) order
pub async fn load_operations(pool: &SqlitePool, txn_id: i64) -> StoreResult<Vec<OperationRow>> {
    let rows = sqlx::query(
        "SELECT id, file_id, transaction_id, kind, source_path, destination_path,
                source_hash, status, error
         FROM file_operations WHERE transaction_id = ? ORDER BY id",
    )
    .bind(txn_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(op_from_row).collect()
}

/// Operations of a transaction with a given status, insertion order
pub async fn load_operations_by_status(
    pool: &SqlitePool,
    txn_id: i64,
    status: OpStatus,
) -> StoreResult<Vec<OperationRow>> {
    let rows = sqlx::query(
        "SELECT id, file_id, transaction_id, kind, source_path, destination_path,
                source_hash, status, error
         FROM file_operations WHERE transaction_id = ? AND status = ? ORDER BY id",
    )
    .bind(txn_id)
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(op_from_row).collect()
}

pub async fn mark_op_started(pool: &SqlitePool, op_id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE file_operations SET started_at = datetime('now') WHERE id = ?")
        .bind(op_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_op_status(pool: &SqlitePool, op_id: i64, status: OpStatus) -> StoreResult<()> {
    sqlx::query(
        "UPDATE file_operations SET status = ?, finished_at = datetime('now') WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(op_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Performed, with a note (used for idempotent skips so rollback knows
/// the destination was not created by this transaction)
pub async fn set_op_performed_with_note(
    pool: &SqlitePool,
    op_id: i64,
    note: &str,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE file_operations
         SET status = 'performed', error = ?, finished_at = datetime('now')
         WHERE id = ?",
    )
    .bind(note)
    .bind(op_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_op_failed(pool: &SqlitePool, op_id: i64, error: &str) -> StoreResult<()> {
    sqlx::query(
        "UPDATE file_operations
         SET status = 'failed', error = ?, finished_at = datetime('now')
         WHERE id = ?",
    )
    .bind(error)
    .bind(op_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark every performed op in the transaction committed
pub async fn commit_performed_ops(pool: &SqlitePool, txn_id: i64) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE file_operations
         SET status = 'committed', finished_at = datetime('now')
         WHERE transaction_id = ? AND status = 'performed'",
    )
    .bind(txn_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Transactions left open or committing by a crashed run
pub async fn unfinished_transactions(pool: &SqlitePool) -> StoreResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM operation_groups WHERE status IN ('open', 'committing', 'rolling-back')
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// True when any non-committed transaction references the file
pub async fn file_has_open_operations(pool: &SqlitePool, file_id: i64) -> StoreResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM file_operations fo
         JOIN operation_groups og ON og.id = fo.transaction_id
         WHERE fo.file_id = ? AND og.status NOT IN ('committed', 'rolled-back')",
    )
    .bind(file_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
