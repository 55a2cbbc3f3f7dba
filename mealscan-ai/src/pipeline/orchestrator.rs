//! Pipeline orchestrator
//!
//! Drives [`PipelineState`] from `Recognize` to `Done`, running every stage
//! through the heartbeat bridge. The first stage error is terminal for the
//! run; nothing is retried.

use futures::future::BoxFuture;
use futures::{pin_mut, Stream, StreamExt};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::heartbeat::{bridge, BridgeError, Frame};
use super::payload::AnalysisReport;
use super::stages::{self, Stage, StageError};
pub use super::state::PipelineFailure;
use super::state::{PipelineState, RunContext, StageOutput};
use crate::config::ServiceConfig;
use crate::services::inference::{
    InferenceService, PriceRequest, QuantifyRequest, RecognizeRequest,
};
use mealscan_common::time::duration_ms;

/// Longest slice of raw upstream text written to the log
const RAW_LOG_LIMIT: usize = 500;

const MAX_MODEL_LEN: usize = 64;

#[derive(Debug, Error, PartialEq)]
#[error("invalid model name: {0:?}")]
pub struct InvalidModel(pub String);

/// Model names are an alphanumeric followed by up to 63 of `[A-Za-z0-9._-]`
pub fn is_valid_model(model: &str) -> bool {
    model.len() <= MAX_MODEL_LEN
        && model.bytes().next().is_some_and(|b| b.is_ascii_alphanumeric())
        && model
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Check a client-supplied model name; blank means "use the default"
pub fn validate_model(model: Option<String>) -> Result<Option<String>, InvalidModel> {
    match model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) {
        Some(m) if !is_valid_model(&m) => Err(InvalidModel(m)),
        other => Ok(other),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub heartbeat_interval: Duration,
    pub default_model: String,
}

impl PipelineConfig {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            default_model: config.default_model.clone(),
        }
    }
}

/// One analysis run's inputs
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Only used to tag log lines
    pub job_id: Option<String>,
    pub image_paths: Vec<PathBuf>,
    pub model: Option<String>,
}

/// What a run emits, in order
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage was handed to its worker
    Open,
    /// The current stage is still running
    Heartbeat,
    /// A stage finished; `payload` is its event body
    StageCompleted { stage: Stage, payload: Value },
    /// Terminal: the run stopped at `failure.stage`
    Failed(PipelineFailure),
    /// Terminal: the final report
    Done(Box<AnalysisReport>),
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Failed(_) | PipelineEvent::Done(_))
    }
}

type StageWork = BoxFuture<'static, Result<StageOutput, StageError>>;

#[derive(Clone)]
pub struct Pipeline {
    inference: Arc<dyn InferenceService>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(inference: Arc<dyn InferenceService>, config: PipelineConfig) -> Self {
        Self { inference, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inference.name()
    }

    /// Run all stages, yielding events as they happen.
    ///
    /// The stream ends right after its single terminal event. Dropping it
    /// early leaves the in-flight stage running to completion in the background.
    pub fn run(&self, request: AnalysisRequest) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let inference = self.inference.clone();
        let interval = self.config.heartbeat_interval;
        let model = request
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());
        let job_id = request.job_id.unwrap_or_else(|| "-".to_string());
        let images = Arc::new(request.image_paths);

        async_stream::stream! {
            if !is_valid_model(&model) {
                warn!(job_id = %job_id, "Rejected model name {:?}", model);
                yield PipelineEvent::Failed(PipelineFailure {
                    stage: Stage::Recognize,
                    message: "invalid model name".to_string(),
                    dish: None,
                    worker_crashed: false,
                });
                return;
            }

            info!(
                job_id = %job_id,
                model = %model,
                backend = inference.name(),
                images = images.len(),
                "Starting analysis"
            );

            let mut ctx = RunContext::new(images.len());
            let mut state = PipelineState::Recognize;

            while let Some((stage, work)) = next_work(&state, &inference, &model, &images) {
                let stage_started = Instant::now();
                let frames = bridge(work, interval);
                pin_mut!(frames);

                let mut outcome: Option<Result<StageOutput, PipelineFailure>> = None;
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(Frame::Open) => yield PipelineEvent::Open,
                        Ok(Frame::Heartbeat) => {
                            debug!(job_id = %job_id, stage = %stage, "Stage still running");
                            yield PipelineEvent::Heartbeat;
                        }
                        Ok(Frame::Result(output)) => outcome = Some(Ok(output)),
                        Err(BridgeError::Work(err)) => {
                            outcome = Some(Err(stage_failure(&job_id, err, state.dish())));
                        }
                        Err(BridgeError::Worker(message)) => {
                            warn!(job_id = %job_id, stage = %stage, "Stage worker died: {}", message);
                            outcome = Some(Err(PipelineFailure {
                                stage,
                                message,
                                dish: state.dish().map(str::to_string),
                                worker_crashed: true,
                            }));
                        }
                    }
                }

                let elapsed_ms = duration_ms(stage_started.elapsed());
                let failure = match outcome {
                    Some(Ok(output)) => {
                        ctx.timings.record(stage, elapsed_ms);
                        match state.advance(output, &ctx) {
                            Ok(transition) => {
                                info!(job_id = %job_id, stage = %stage, elapsed_ms, "Stage complete");
                                state = transition.next;
                                yield PipelineEvent::StageCompleted {
                                    stage: transition.stage,
                                    payload: transition.payload,
                                };
                                continue;
                            }
                            Err(failure) => failure,
                        }
                    }
                    Some(Err(failure)) => failure,
                    None => PipelineFailure {
                        stage,
                        message: "worker ended without a result".to_string(),
                        dish: state.dish().map(str::to_string),
                        worker_crashed: true,
                    },
                };

                warn!(
                    job_id = %job_id,
                    stage = %failure.stage,
                    code = failure.code(),
                    elapsed_ms,
                    "Analysis failed: {}",
                    failure.message
                );
                yield PipelineEvent::Failed(failure.clone());
                state = PipelineState::Failed { failure };
            }

            if let PipelineState::Done { report } = state {
                info!(
                    job_id = %job_id,
                    dish = %report.dish,
                    total_kcal = report.total_kcal,
                    total_ms = report.total_ms,
                    "Analysis complete"
                );
                yield PipelineEvent::Done(report);
            }
        }
    }

    /// Run to completion and return only the outcome
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, PipelineFailure> {
        let events = self.run(request);
        pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                PipelineEvent::Done(report) => return Ok(*report),
                PipelineEvent::Failed(failure) => return Err(failure),
                _ => {}
            }
        }

        Err(PipelineFailure {
            stage: Stage::Recognize,
            message: "pipeline ended without a result".to_string(),
            dish: None,
            worker_crashed: true,
        })
    }
}

/// The stage to run in `state` and its boxed work, `None` once terminal
fn next_work(
    state: &PipelineState,
    inference: &Arc<dyn InferenceService>,
    model: &str,
    images: &Arc<Vec<PathBuf>>,
) -> Option<(Stage, StageWork)> {
    let inference = inference.clone();
    match state {
        PipelineState::Recognize => {
            let request = RecognizeRequest {
                model: model.to_string(),
                image_paths: images.as_ref().clone(),
            };
            let work: StageWork = Box::pin(async move {
                let raw = inference.recognize(&request).await?;
                stages::parse_recognition(&raw).map(StageOutput::Recognized)
            });
            Some((Stage::Recognize, work))
        }
        PipelineState::Quantify { recognition } => {
            let request = QuantifyRequest {
                model: model.to_string(),
                image_paths: images.as_ref().clone(),
                dish_hint: recognition.dish.clone(),
                ingredient_hints: recognition.ingredients.clone(),
            };
            let work: StageWork = Box::pin(async move {
                let raw = inference.quantify(&request).await?;
                stages::parse_quantification(&raw).map(StageOutput::Quantified)
            });
            Some((Stage::Quantify, work))
        }
        PipelineState::Price {
            recognition,
            quantification,
        } => {
            let request = PriceRequest {
                model: model.to_string(),
                dish: recognition.dish.clone(),
                items: quantification.items.clone(),
            };
            let work: StageWork = Box::pin(async move {
                let raw = inference.price(&request).await?;
                stages::parse_pricing(&raw).map(StageOutput::Priced)
            });
            Some((Stage::Price, work))
        }
        PipelineState::Done { .. } | PipelineState::Failed { .. } => None,
    }
}

fn stage_failure(job_id: &str, err: StageError, dish: Option<&str>) -> PipelineFailure {
    if let Some(raw) = err.raw.as_deref() {
        warn!(
            job_id = %job_id,
            stage = %err.stage,
            raw = %truncate(raw, RAW_LOG_LIMIT),
            "Upstream response rejected"
        );
    }
    PipelineFailure {
        stage: err.stage,
        message: err.message,
        dish: dish.map(str::to_string),
        worker_crashed: false,
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
