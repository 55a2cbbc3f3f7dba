//! Server-Sent Events stream of one analysis run
//!
//! GET /analyze_sse?job_id=<id>&model=<name>
//!
//! The response is always 200 once the job is found and the model name is
//! accepted; a stage failure is reported in the stream as `error` followed by
//! `done`. Every completed phase is merged into the partial store after its
//! frames are handed to the body.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::{pin_mut, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use tracing::{info, warn};

use super::history::record_history;
use crate::{
    error::{ApiError, ApiResult},
    pipeline::{validate_model, AnalysisRequest, PipelineEvent},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub job_id: Option<String>,
    pub model: Option<String>,
}

/// GET /analyze_sse
pub async fn analyze_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let job_id = query
        .job_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingJobId)?;
    let model = validate_model(query.model)?;
    let job = state.jobs.get_job(&job_id).await?;

    info!(job_id = %job.id, images = job.input_refs.len(), "SSE client connected");

    let events = state.pipeline.run(AnalysisRequest {
        job_id: Some(job.id.clone()),
        image_paths: job.input_refs.iter().map(PathBuf::from).collect(),
        model,
    });

    let partials = state.partials.clone();
    let db = state.db.clone();
    let job_id = job.id;

    let body = async_stream::stream! {
        pin_mut!(events);
        let mut finished = false;

        while let Some(event) = events.next().await {
            finished |= event.is_terminal();
            match event.to_frames() {
                Ok(frames) => {
                    for frame in frames {
                        yield Ok::<Event, Infallible>(frame.into());
                    }
                }
                Err(e) => warn!(job_id = %job_id, "Failed to encode event: {}", e),
            }

            if let Some((phase, payload)) = event.phase_record() {
                partials.put_phase(&job_id, phase, &payload).await;
            }

            if let PipelineEvent::Done(report) = &event {
                if let Err(e) = record_history(&db, report).await {
                    warn!(job_id = %job_id, "Failed to record analysis history: {}", e);
                }
            }
        }

        if finished {
            info!(job_id = %job_id, "SSE stream finished");
        } else {
            warn!(job_id = %job_id, "SSE stream ended without a terminal event");
        }
    };

    let mut response = Sse::new(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}

pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/analyze_sse", get(analyze_stream))
}
