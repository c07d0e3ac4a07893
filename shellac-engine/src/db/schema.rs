//! Store schema and migrations
//!
//! The schema is versioned; [`migrate`] applies any outstanding forward
//! migrations inside a single transaction. Older installs kept separate
//! sqlite files per concern (fingerprints / operations / progress);
//! [`merge_legacy_stores`] folds those into the unified store and renames
//! the originals with a `.legacy` suffix. Legacy files are never deleted.

use super::{StoreError, StoreResult};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Schema version this build expects
pub const SCHEMA_VERSION: i64 = 2;

/// Apply outstanding migrations, all-or-nothing
pub async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let from = current_version(pool).await?;
    if from >= SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!(from, to = SCHEMA_VERSION, "Migrating store schema");

    let mut tx = pool.begin().await?;
    if from < 1 {
        apply_v1(&mut tx).await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
            .execute(&mut *tx)
            .await?;
    }
    if from < 2 {
        apply_v2(&mut tx).await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (2)")
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Highest applied schema version, 0 for a fresh store
pub async fn current_version(pool: &SqlitePool) -> StoreResult<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// v1: core entity tables, operation log, checkpoints
async fn apply_v1(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            absolute_path TEXT NOT NULL UNIQUE,
            content_hash TEXT,
            size_bytes INTEGER NOT NULL,
            modified_time TEXT NOT NULL,
            fingerprint_id INTEGER REFERENCES fingerprints(id),
            metadata_id INTEGER REFERENCES metadata(id),
            quality_score REAL,
            status TEXT NOT NULL DEFAULT 'discovered'
                CHECK (status IN ('discovered', 'analyzed', 'healthy',
                                  'quarantined', 'organized', 'rejected', 'failed')),
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE fingerprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL UNIQUE,
            duration_sec REAL,
            sample_rate_hz INTEGER,
            bit_depth INTEGER,
            channels INTEGER,
            codec TEXT,
            bitrate_kbps INTEGER
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            artist TEXT,
            title TEXT,
            album TEXT,
            year INTEGER,
            genre TEXT,
            track_number INTEGER,
            disc_number INTEGER,
            source TEXT NOT NULL CHECK (source IN ('tag', 'service', 'filename-parse'))
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE quality_analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
            technical_score REAL NOT NULL,
            audio_fidelity_score REAL NOT NULL,
            integrity_score REAL NOT NULL,
            reference_score REAL,
            final_score REAL NOT NULL,
            grade TEXT NOT NULL,
            recommended_action TEXT NOT NULL,
            defects TEXT NOT NULL DEFAULT '[]',
            health_score INTEGER NOT NULL DEFAULT 100,
            clipping_ratio REAL,
            silence_ratio REAL,
            duration_sec REAL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE duplicate_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_kind TEXT NOT NULL CHECK (key_kind IN ('hash', 'fingerprint')),
            key_value TEXT NOT NULL,
            primary_file_id INTEGER REFERENCES files(id),
            size INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE duplicate_members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            is_primary INTEGER NOT NULL DEFAULT 0,
            similarity REAL,
            UNIQUE (group_id, file_id)
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE operation_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'committing', 'committed',
                                  'rolling-back', 'rolled-back')),
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            committed_at TEXT
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE file_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER REFERENCES files(id),
            transaction_id INTEGER NOT NULL REFERENCES operation_groups(id),
            kind TEXT NOT NULL
                CHECK (kind IN ('copy', 'move', 'link', 'write-tag',
                                'create-dir', 'rename')),
            source_path TEXT NOT NULL,
            destination_path TEXT,
            source_hash TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'performed', 'committed',
                                  'rolled-back', 'failed')),
            started_at TEXT,
            finished_at TEXT,
            error TEXT
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE checkpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phase TEXT NOT NULL,
            last_batch_id INTEGER NOT NULL,
            counters TEXT NOT NULL DEFAULT '{}',
            open_transaction_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE rejection_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            category TEXT NOT NULL
                CHECK (category IN ('duplicate', 'low_quality', 'corrupted',
                                    'unsupported', 'invalid_metadata', 'error')),
            chosen_file_id INTEGER REFERENCES files(id),
            group_id INTEGER REFERENCES duplicate_groups(id) ON DELETE SET NULL,
            rejected_path TEXT NOT NULL,
            original_path TEXT NOT NULL,
            content_hash TEXT,
            reason_text TEXT NOT NULL,
            rejected_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE organization_targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
            genre TEXT NOT NULL,
            decade TEXT NOT NULL,
            final_path TEXT NOT NULL,
            pattern_used TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    // updated_at maintenance; recursive triggers are off in sqlite so the
    // inner UPDATE does not re-fire this trigger
    sqlx::query(
        r#"
        CREATE TRIGGER files_touch_updated_at
        AFTER UPDATE ON files
        BEGIN
            UPDATE files SET updated_at = datetime('now') WHERE id = NEW.id;
        END
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("CREATE INDEX idx_files_status ON files(status)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX idx_files_content_hash ON files(content_hash)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX idx_members_group_file ON duplicate_members(group_id, file_id)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX idx_ops_txn_status ON file_operations(transaction_id, status)")
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// v2: needs-review queue and runtime settings
async fn apply_v2(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (file_id, reason)
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES ('store_lock_wait_ms', '5000')")
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Fold legacy per-concern stores into the unified store.
///
/// Looks for `fingerprints.db`, `operations.db`, and `progress.db` next to
/// the unified store. Each found file is read tolerantly (unknown layouts
/// are skipped with a warning), merged, and renamed `<name>.legacy`.
pub async fn merge_legacy_stores(pool: &SqlitePool, store_path: &Path) -> StoreResult<()> {
    let Some(dir) = store_path.parent() else {
        return Ok(());
    };

    for name in ["fingerprints.db", "operations.db", "progress.db"] {
        let legacy_path = dir.join(name);
        if !legacy_path.exists() {
            continue;
        }

        tracing::info!(path = %legacy_path.display(), "Merging legacy store");
        match merge_one_legacy(pool, &legacy_path, name).await {
            Ok(rows) => {
                tracing::info!(path = %legacy_path.display(), rows, "Legacy store merged")
            }
            Err(e) => {
                tracing::warn!(path = %legacy_path.display(), error = %e, "Legacy merge skipped")
            }
        }

        // Archive, never delete
        let archived = legacy_path.with_extension("db.legacy");
        std::fs::rename(&legacy_path, &archived).map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::info!(path = %archived.display(), "Legacy store archived");
    }

    Ok(())
}

async fn merge_one_legacy(pool: &SqlitePool, path: &Path, name: &str) -> StoreResult<u64> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let legacy = SqlitePool::connect_with(options).await?;

    let merged = match name {
        "fingerprints.db" => merge_legacy_fingerprints(pool, &legacy).await?,
        "operations.db" => merge_legacy_operations(pool, &legacy).await?,
        "progress.db" => merge_legacy_checkpoints(pool, &legacy).await?,
        _ => 0,
    };

    legacy.close().await;
    Ok(merged)
}

async fn merge_legacy_fingerprints(pool: &SqlitePool, legacy: &SqlitePool) -> StoreResult<u64> {
    let rows = sqlx::query("SELECT fingerprint, duration_sec FROM fingerprints")
        .fetch_all(legacy)
        .await?;
    let mut merged = 0;
    for row in rows {
        let fingerprint: String = row.get("fingerprint");
        let duration: Option<f64> = row.try_get("duration_sec").ok();
        let result =
            sqlx::query("INSERT OR IGNORE INTO fingerprints (fingerprint, duration_sec) VALUES (?, ?)")
                .bind(&fingerprint)
                .bind(duration)
                .execute(pool)
                .await?;
        merged += result.rows_affected();
    }
    Ok(merged)
}

async fn merge_legacy_operations(pool: &SqlitePool, legacy: &SqlitePool) -> StoreResult<u64> {
    let rows =
        sqlx::query("SELECT kind, source_path, destination_path, status FROM file_operations")
            .fetch_all(legacy)
            .await?;
    if rows.is_empty() {
        return Ok(0);
    }

    // Legacy ops predate the group model; they land in one closed group.
    let group_id: i64 = sqlx::query_scalar(
        "INSERT INTO operation_groups (status, reason, committed_at)
         VALUES ('committed', 'legacy-import', datetime('now'))
         RETURNING id",
    )
    .fetch_one(pool)
    .await?;

    let mut merged = 0;
    for row in rows {
        let kind: String = row.get("kind");
        let source: String = row.get("source_path");
        let dest: Option<String> = row.try_get("destination_path").ok();
        let status: String = row.try_get("status").unwrap_or_else(|_| "committed".to_string());
        sqlx::query(
            "INSERT INTO file_operations (transaction_id, kind, source_path, destination_path, status)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(&kind)
        .bind(&source)
        .bind(dest)
        .bind(&status)
        .execute(pool)
        .await?;
        merged += 1;
    }
    Ok(merged)
}

async fn merge_legacy_checkpoints(pool: &SqlitePool, legacy: &SqlitePool) -> StoreResult<u64> {
    let rows = sqlx::query("SELECT phase, last_batch_id, counters FROM checkpoints")
        .fetch_all(legacy)
        .await?;
    let mut merged = 0;
    for row in rows {
        let phase: String = row.get("phase");
        let last_batch_id: i64 = row.get("last_batch_id");
        let counters: String = row.try_get("counters").unwrap_or_else(|_| "{}".to_string());
        sqlx::query("INSERT INTO checkpoints (phase, last_batch_id, counters) VALUES (?, ?, ?)")
            .bind(&phase)
            .bind(last_batch_id)
            .bind(&counters)
            .execute(pool)
            .await?;
        merged += 1;
    }
    Ok(merged)
}
