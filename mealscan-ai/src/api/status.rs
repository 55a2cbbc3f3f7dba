//! Partial progress polling
//!
//! GET /status?job_id=<id> reads the partial store directly, so any client can
//! follow a run without holding its stream open.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    models::PartialRecord,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

/// GET /status
pub async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<PartialRecord>> {
    let job_id = query
        .job_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingJobId)?;

    state
        .partials
        .get_status(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no progress recorded for job {}", job_id)))
}

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status", get(job_status))
}
