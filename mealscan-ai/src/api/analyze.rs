//! Blocking analysis
//!
//! POST /analyze uploads images and runs the whole pipeline inside the request.
//! The model comes from the `model` form field, else the `model` query parameter.

use axum::{
    extract::{Multipart, Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    history::record_history,
    upload::{read_form, store_images},
};
use crate::{
    error::{ApiError, ApiResult},
    pipeline::{validate_model, AnalysisReport, AnalysisRequest, PipelineFailure},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    pub model: Option<String>,
}

impl From<PipelineFailure> for ApiError {
    fn from(failure: PipelineFailure) -> Self {
        if failure.worker_crashed {
            ApiError::Internal(format!("{}: {}", failure.code(), failure.message))
        } else {
            ApiError::StageFailed {
                code: failure.code(),
                message: failure.message,
                dish: failure.dish,
            }
        }
    }
}

/// POST /analyze
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    multipart: Multipart,
) -> ApiResult<Json<AnalysisReport>> {
    let form = read_form(multipart).await?;
    let model = validate_model(form.model.or(query.model))?;
    let paths = store_images(&state, form.files).await?;
    info!(images = paths.len(), model = ?model, "Blocking analysis requested");

    let report = state
        .pipeline
        .analyze(AnalysisRequest {
            job_id: None,
            image_paths: paths,
            model,
        })
        .await?;

    if let Err(e) = record_history(&state.db, &report).await {
        warn!("Failed to record analysis history: {}", e);
    }

    Ok(Json(report))
}

pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}
