//! Analysis history persistence

use mealscan_common::{Error, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::models::HistorySummary;
use crate::utils::{db_retry::DEFAULT_MAX_LOCK_WAIT_MS, retry_on_lock};

/// Store a finished `done` payload
pub async fn insert_history(
    pool: &SqlitePool,
    id: &str,
    payload: &Value,
    created_at: &str,
) -> Result<()> {
    let dish = payload.get("dish").and_then(Value::as_str).map(str::to_string);
    let payload_json = serde_json::to_string(payload)?;

    retry_on_lock("insert_history", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            "INSERT INTO analysis_history (id, dish, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&dish)
        .bind(&payload_json)
        .bind(created_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    })
    .await
}

/// Most recent analyses first
pub async fn recent_history(pool: &SqlitePool, limit: u32) -> Result<Vec<HistorySummary>> {
    let rows = sqlx::query(
        "SELECT id, payload, created_at FROM analysis_history ORDER BY created_at DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let created_at: String = row.get("created_at");
        let payload: String = row.get("payload");
        match serde_json::from_str::<Value>(&payload) {
            Ok(payload) => items.push(HistorySummary::from_payload(id, created_at, &payload)),
            Err(e) => tracing::warn!(id = %id, "Skipping unreadable history row: {}", e),
        }
    }
    Ok(items)
}

/// Delete rows created strictly before `cutoff`; returns the number removed
pub async fn delete_history_before(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM analysis_history WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
