//! Partial record persistence
//!
//! Rows carry a `revision` that every write bumps. Writers read a row, merge,
//! and write back only if the revision is unchanged, so two processes merging
//! into the same job cannot silently drop each other's phase.

use mealscan_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::PartialRecord;
use crate::utils::{db_retry::DEFAULT_MAX_LOCK_WAIT_MS, retry_on_lock};

/// A record as stored, with the revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPartial {
    pub record: PartialRecord,
    pub revision: i64,
}

pub async fn load_partial(pool: &SqlitePool, job_id: &str) -> Result<Option<StoredPartial>> {
    let row = sqlx::query(
        "SELECT flags, last_phase, data, revision FROM partial_records WHERE job_id = ?",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let flags: String = row.get("flags");
    let data: String = row.get("data");
    let record = PartialRecord {
        flags: serde_json::from_str(&flags)
            .map_err(|e| Error::Internal(format!("Failed to deserialize flags: {}", e)))?,
        last_phase: row.get("last_phase"),
        data: serde_json::from_str(&data)
            .map_err(|e| Error::Internal(format!("Failed to deserialize data: {}", e)))?,
    };

    Ok(Some(StoredPartial {
        record,
        revision: row.get("revision"),
    }))
}

/// Insert the first record for a job. Returns `false` if another writer got there first.
pub async fn insert_partial(
    pool: &SqlitePool,
    job_id: &str,
    record: &PartialRecord,
    updated_at: &str,
) -> Result<bool> {
    let flags = serde_json::to_string(&record.flags)?;
    let data = serde_json::to_string(&record.data)?;

    retry_on_lock("insert_partial", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO partial_records (job_id, flags, last_phase, data, revision, updated_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(&flags)
        .bind(&record.last_phase)
        .bind(&data)
        .bind(updated_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Overwrite a record only if it is still at `expected_revision`.
/// Returns `false` when a concurrent writer moved it on.
pub async fn update_partial_if_revision(
    pool: &SqlitePool,
    job_id: &str,
    record: &PartialRecord,
    expected_revision: i64,
    updated_at: &str,
) -> Result<bool> {
    let flags = serde_json::to_string(&record.flags)?;
    let data = serde_json::to_string(&record.data)?;

    retry_on_lock("update_partial", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE partial_records
            SET flags = ?, last_phase = ?, data = ?, revision = revision + 1, updated_at = ?
            WHERE job_id = ? AND revision = ?
            "#,
        )
        .bind(&flags)
        .bind(&record.last_phase)
        .bind(&data)
        .bind(updated_at)
        .bind(job_id)
        .bind(expected_revision)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

pub async fn delete_partial(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM partial_records WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use serde_json::json;
    use tempfile::TempDir;

    const TS: &str = "2026-01-01T00:00:00.000000Z";

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database_pool(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (temp_dir, pool)
    }

    fn record(phase: &str) -> PartialRecord {
        let mut r = PartialRecord::default();
        r.merge_phase(phase, &json!({"dish": "ramen"}));
        r
    }

    #[tokio::test]
    async fn test_insert_then_load() {
        let (_dir, pool) = setup().await;
        assert!(insert_partial(&pool, "j1", &record("recognize"), TS).await.unwrap());

        let stored = load_partial(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.record, record("recognize"));
    }

    #[tokio::test]
    async fn test_second_insert_loses() {
        let (_dir, pool) = setup().await;
        assert!(insert_partial(&pool, "j1", &record("recognize"), TS).await.unwrap());
        assert!(!insert_partial(&pool, "j1", &record("ing_quant"), TS).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_requires_matching_revision() {
        let (_dir, pool) = setup().await;
        insert_partial(&pool, "j1", &record("recognize"), TS).await.unwrap();

        let next = record("ing_quant");
        assert!(!update_partial_if_revision(&pool, "j1", &next, 7, TS).await.unwrap());
        assert!(update_partial_if_revision(&pool, "j1", &next, 1, TS).await.unwrap());

        let stored = load_partial(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.record.last_phase, "ing_quant");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, pool) = setup().await;
        insert_partial(&pool, "j1", &record("recognize"), TS).await.unwrap();
        delete_partial(&pool, "j1").await.unwrap();
        assert!(load_partial(&pool, "j1").await.unwrap().is_none());
    }
}
