//! Duplicate group rows
//!
//! Deleting a group cascades to its members. Exactly one member per
//! group carries is_primary = 1, enforced by the grouper when it
//! finalizes primary selection.

use super::{StoreError, StoreResult};
use sqlx::{Row, SqlitePool};

/// How the group was keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKeyKind {
    Hash,
    Fingerprint,
}

impl GroupKeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKeyKind::Hash => "hash",
            GroupKeyKind::Fingerprint => "fingerprint",
        }
    }

    pub fn parse(s: &str) -> StoreResult<GroupKeyKind> {
        match s {
            "hash" => Ok(GroupKeyKind::Hash),
            "fingerprint" => Ok(GroupKeyKind::Fingerprint),
            other => Err(StoreError::Integrity(format!("Unknown key kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub key_kind: GroupKeyKind,
    pub key_value: String,
    pub primary_file_id: Option<i64>,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub id: i64,
    pub group_id: i64,
    pub file_id: i64,
    pub is_primary: bool,
    pub similarity: Option<f64>,
}

/// Create a group with its members in one store transaction.
/// `members` is (file_id, similarity); the primary is set afterwards via
/// [`set_primary`].
pub async fn create_group(
    pool: &SqlitePool,
    key_kind: GroupKeyKind,
    key_value: &str,
    members: &[(i64, Option<f64>)],
) -> StoreResult<i64> {
    let mut tx = pool.begin().await?;

    let group_id: i64 = sqlx::query_scalar(
        "INSERT INTO duplicate_groups (key_kind, key_value, size) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(key_kind.as_str())
    .bind(key_value)
    .bind(members.len() as i64)
    .fetch_one(&mut *tx)
    .await?;

    for (file_id, similarity) in members {
        sqlx::query(
            "INSERT INTO duplicate_members (group_id, file_id, similarity) VALUES (?, ?, ?)",
        )
        .bind(group_id)
        .bind(file_id)
        .bind(similarity)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(group_id)
}

/// Mark the chosen file as the group primary and clear every other member
pub async fn set_primary(pool: &SqlitePool, group_id: i64, file_id: i64) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE duplicate_members SET is_primary = 0 WHERE group_id = ?")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
    let updated = sqlx::query(
        "UPDATE duplicate_members SET is_primary = 1 WHERE group_id = ? AND file_id = ?",
    )
    .bind(group_id)
    .bind(file_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() != 1 {
        return Err(StoreError::Integrity(format!(
            "File {} is not a member of group {}",
            file_id, group_id
        )));
    }
    sqlx::query("UPDATE duplicate_groups SET primary_file_id = ? WHERE id = ?")
        .bind(file_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn load_group(pool: &SqlitePool, group_id: i64) -> StoreResult<Option<GroupRow>> {
    let row = sqlx::query(
        "SELECT id, key_kind, key_value, primary_file_id, size FROM duplicate_groups WHERE id = ?",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let kind_str: String = row.get("key_kind");
        Ok(GroupRow {
            id: row.get("id"),
            key_kind: GroupKeyKind::parse(&kind_str)?,
            key_value: row.get("key_value"),
            primary_file_id: row.get("primary_file_id"),
            size: row.get("size"),
        })
    })
    .transpose()
}

pub async fn load_members(pool: &SqlitePool, group_id: i64) -> StoreResult<Vec<MemberRow>> {
    let rows = sqlx::query(
        "SELECT id, group_id, file_id, is_primary, similarity
         FROM duplicate_members WHERE group_id = ? ORDER BY id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| MemberRow {
            id: row.get("id"),
            group_id: row.get("group_id"),
            file_id: row.get("file_id"),
            is_primary: row.get::<i64, _>("is_primary") != 0,
            similarity: row.get("similarity"),
        })
        .collect())
}

/// All group ids, in creation order
pub async fn all_group_ids(pool: &SqlitePool) -> StoreResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM duplicate_groups ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// File ids of healthy files that belong to no group (singletons)
pub async fn ungrouped_healthy_file_ids(pool: &SqlitePool) -> StoreResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM files
         WHERE status = 'healthy'
           AND id NOT IN (SELECT file_id FROM duplicate_members)
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn delete_group(pool: &SqlitePool, group_id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM duplicate_groups WHERE id = ?")
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{files, init_store_in_memory};
    use chrono::Utc;

    async fn seed_files(pool: &SqlitePool, n: usize) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = files::upsert_discovered(pool, &format!("/m/{}.mp3", i), 100, Utc::now())
                .await
                .unwrap()
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn test_exactly_one_primary() {
        let pool = init_store_in_memory().await.unwrap();
        let file_ids = seed_files(&pool, 3).await;

        let group_id = create_group(
            &pool,
            GroupKeyKind::Hash,
            "abc",
            &[(file_ids[0], None), (file_ids[1], None), (file_ids[2], None)],
        )
        .await
        .unwrap();

        set_primary(&pool, group_id, file_ids[1]).await.unwrap();
        set_primary(&pool, group_id, file_ids[2]).await.unwrap();

        let members = load_members(&pool, group_id).await.unwrap();
        let primaries: Vec<_> = members.iter().filter(|m| m.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].file_id, file_ids[2]);

        let group = load_group(&pool, group_id).await.unwrap().unwrap();
        assert_eq!(group.primary_file_id, Some(file_ids[2]));
    }

    #[tokio::test]
    async fn test_set_primary_rejects_non_member() {
        let pool = init_store_in_memory().await.unwrap();
        let file_ids = seed_files(&pool, 3).await;
        let group_id = create_group(
            &pool,
            GroupKeyKind::Fingerprint,
            "env1:aa",
            &[(file_ids[0], Some(0.95)), (file_ids[1], Some(0.93))],
        )
        .await
        .unwrap();

        let result = set_primary(&pool, group_id, file_ids[2]).await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_members() {
        let pool = init_store_in_memory().await.unwrap();
        let file_ids = seed_files(&pool, 2).await;
        let group_id = create_group(
            &pool,
            GroupKeyKind::Hash,
            "h1",
            &[(file_ids[0], None), (file_ids[1], None)],
        )
        .await
        .unwrap();

        delete_group(&pool, group_id).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_members")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_singletons_exclude_group_members() {
        let pool = init_store_in_memory().await.unwrap();
        let file_ids = seed_files(&pool, 3).await;
        for id in &file_ids {
            files::set_status(&pool, *id, files::FileStatus::Healthy)
                .await
                .unwrap();
        }
        create_group(
            &pool,
            GroupKeyKind::Hash,
            "h2",
            &[(file_ids[0], None), (file_ids[1], None)],
        )
        .await
        .unwrap();

        let singles = ungrouped_healthy_file_ids(&pool).await.unwrap();
        assert_eq!(singles, vec![file_ids[2]]);
    }
}
