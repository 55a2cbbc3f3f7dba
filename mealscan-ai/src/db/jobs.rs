//! Job manifest persistence

use mealscan_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::JobManifest;
use crate::utils::{db_retry::DEFAULT_MAX_LOCK_WAIT_MS, retry_on_lock};

/// Insert a manifest; job ids are write-once, a duplicate id is an error
pub async fn insert_job(pool: &SqlitePool, job_id: &str, manifest: &JobManifest) -> Result<()> {
    let manifest_json = serde_json::to_string(manifest)?;
    let created_at = manifest.created_at.clone();

    retry_on_lock("insert_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("INSERT INTO jobs (job_id, manifest, created_at) VALUES (?, ?, ?)")
            .bind(job_id)
            .bind(&manifest_json)
            .bind(&created_at)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Load a manifest by id
pub async fn load_job(pool: &SqlitePool, job_id: &str) -> Result<Option<JobManifest>> {
    let manifest: Option<String> =
        sqlx::query_scalar("SELECT manifest FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;

    manifest
        .map(|text| {
            serde_json::from_str(&text).map_err(|e| {
                Error::Internal(format!("Failed to deserialize manifest for {}: {}", job_id, e))
            })
        })
        .transpose()
}

/// Jobs created strictly before `cutoff` (ISO-8601), oldest first
pub async fn list_jobs_before(
    pool: &SqlitePool,
    cutoff: &str,
) -> Result<Vec<(String, JobManifest)>> {
    let rows = sqlx::query(
        "SELECT job_id, manifest FROM jobs WHERE created_at < ? ORDER BY created_at ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let job_id: String = row.get("job_id");
        let manifest: String = row.get("manifest");
        match serde_json::from_str::<JobManifest>(&manifest) {
            Ok(manifest) => jobs.push((job_id, manifest)),
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Skipping unreadable manifest: {}", e);
                jobs.push((
                    job_id,
                    JobManifest {
                        paths: Vec::new(),
                        created_at: String::new(),
                    },
                ));
            }
        }
    }
    Ok(jobs)
}

pub async fn delete_job(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database_pool(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (temp_dir, pool)
    }

    fn manifest(created_at: &str) -> JobManifest {
        JobManifest {
            paths: vec!["/u/a.jpg".into()],
            created_at: created_at.into(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let (_dir, pool) = setup().await;
        let m = manifest("2026-01-01T00:00:00.000000Z");

        insert_job(&pool, "j1", &m).await.unwrap();
        assert_eq!(load_job(&pool, "j1").await.unwrap(), Some(m));
        assert_eq!(load_job(&pool, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_job_ids_are_write_once() {
        let (_dir, pool) = setup().await;
        insert_job(&pool, "j1", &manifest("2026-01-01T00:00:00.000000Z"))
            .await
            .unwrap();
        assert!(insert_job(&pool, "j1", &manifest("2026-01-02T00:00:00.000000Z"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_before_cutoff_and_delete() {
        let (_dir, pool) = setup().await;
        insert_job(&pool, "old", &manifest("2025-01-01T00:00:00.000000Z"))
            .await
            .unwrap();
        insert_job(&pool, "new", &manifest("2026-06-01T00:00:00.000000Z"))
            .await
            .unwrap();

        let expired = list_jobs_before(&pool, "2026-01-01T00:00:00.000000Z")
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "old");

        delete_job(&pool, "old").await.unwrap();
        assert_eq!(load_job(&pool, "old").await.unwrap(), None);
        assert!(load_job(&pool, "new").await.unwrap().is_some());
    }
}
