//! Analysis history
//!
//! GET /history lists the most recent successful analyses.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db, error::ApiResult, models::HistorySummary, pipeline::AnalysisReport, AppState};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<HistorySummary>,
}

/// Store a finished report; returns the new history id
pub async fn record_history(db: &SqlitePool, report: &AnalysisReport) -> mealscan_common::Result<String> {
    let id = Uuid::new_v4().to_string();
    let payload = serde_json::to_value(report)?;
    let created_at = mealscan_common::time::to_iso8601(mealscan_common::time::now());
    db::history::insert_history(db, &id, &payload, &created_at).await?;
    Ok(id)
}

/// GET /history?limit=N
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let items = db::history::recent_history(&state.db, limit).await?;
    Ok(Json(HistoryResponse { items }))
}

pub fn history_routes() -> Router<AppState> {
    Router::new().route("/history", get(list_history))
}
