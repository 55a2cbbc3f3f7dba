//! Pipeline state machine
//!
//! `Recognize → Quantify → Price → Done`, with `Failed` absorbing. Each state
//! owns exactly the typed outputs of the stages before it, so a stage can only
//! read what earlier stages actually produced.

use serde_json::Value;
use tokio::time::Instant;

use super::payload::{self, AnalysisReport, ReportInputs, Timings};
use super::stages::{Pricing, Quantification, Recognition, Stage};
use mealscan_common::time::duration_ms;

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub message: String,
    /// Dish recognized before the failure, if any
    pub dish: Option<String>,
    /// The worker itself died (panic) rather than reporting a stage error
    pub worker_crashed: bool,
}

impl PipelineFailure {
    pub fn code(&self) -> &'static str {
        self.stage.failure_code()
    }
}

/// Typed result of one stage
#[derive(Debug, Clone)]
pub enum StageOutput {
    Recognized(Recognition),
    Quantified(Quantification),
    Priced(Pricing),
}

#[derive(Debug, Clone)]
pub enum PipelineState {
    Recognize,
    Quantify {
        recognition: Recognition,
    },
    Price {
        recognition: Recognition,
        quantification: Quantification,
    },
    Done {
        report: Box<AnalysisReport>,
    },
    Failed {
        failure: PipelineFailure,
    },
}

/// Per-run bookkeeping shared by all transitions
#[derive(Debug, Clone)]
pub struct RunContext {
    pub started: Instant,
    pub timings: Timings,
    pub angles_used: usize,
}

impl RunContext {
    pub fn new(angles_used: usize) -> Self {
        Self {
            started: Instant::now(),
            timings: Timings::default(),
            angles_used,
        }
    }
}

/// Result of a successful transition: the next state and the stage's event payload
#[derive(Debug)]
pub struct Transition {
    pub next: PipelineState,
    pub stage: Stage,
    pub payload: Value,
}

impl PipelineState {
    /// Stage to run in this state; `None` once terminal
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Recognize => Some(Stage::Recognize),
            PipelineState::Quantify { .. } => Some(Stage::Quantify),
            PipelineState::Price { .. } => Some(Stage::Price),
            PipelineState::Done { .. } | PipelineState::Failed { .. } => None,
        }
    }

    /// Dish known so far
    pub fn dish(&self) -> Option<&str> {
        match self {
            PipelineState::Recognize => None,
            PipelineState::Quantify { recognition } | PipelineState::Price { recognition, .. } => {
                Some(&recognition.dish)
            }
            PipelineState::Done { report } => Some(&report.dish),
            PipelineState::Failed { failure } => failure.dish.as_deref(),
        }
    }

    /// Fold a stage's output in and move to the next state.
    ///
    /// Output that does not belong to the current stage fails the run.
    pub fn advance(self, output: StageOutput, ctx: &RunContext) -> Result<Transition, PipelineFailure> {
        match (self, output) {
            (PipelineState::Recognize, StageOutput::Recognized(recognition)) => Ok(Transition {
                payload: payload::recognize_event(&recognition, &ctx.timings),
                stage: Stage::Recognize,
                next: PipelineState::Quantify { recognition },
            }),

            (PipelineState::Quantify { recognition }, StageOutput::Quantified(quantification)) => {
                Ok(Transition {
                    payload: payload::ing_quant_event(&quantification, &ctx.timings),
                    stage: Stage::Quantify,
                    next: PipelineState::Price {
                        recognition,
                        quantification,
                    },
                })
            }

            (
                PipelineState::Price {
                    recognition,
                    quantification,
                },
                StageOutput::Priced(pricing),
            ) => {
                let report = AnalysisReport::assemble(ReportInputs {
                    recognition: &recognition,
                    quantification: &quantification,
                    pricing: &pricing,
                    timings: ctx.timings.clone(),
                    total_ms: duration_ms(ctx.started.elapsed()),
                    angles_used: ctx.angles_used,
                });
                Ok(Transition {
                    payload: report.calories_event(),
                    stage: Stage::Price,
                    next: PipelineState::Done {
                        report: Box::new(report),
                    },
                })
            }

            (state, _) => {
                let stage = state.stage().unwrap_or(Stage::Price);
                Err(PipelineFailure {
                    stage,
                    message: format!("unexpected output for stage {}", stage),
                    dish: state.dish().map(str::to_string),
                    worker_crashed: true,
                })
            }
        }
    }
}
