//! Pipeline events on the wire and in the partial store

use serde_json::{json, Value};

use super::orchestrator::PipelineEvent;
use mealscan_common::SseFrame;

/// Phase name recorded once the final report is available
pub const DONE_PHASE: &str = "done";

/// Event name of the stage failure frame
pub const ERROR_EVENT: &str = "error";

impl PipelineEvent {
    /// SSE frames for this event.
    ///
    /// A failure becomes two frames: `error` with the stage and message, then
    /// `done` carrying only the failure code.
    pub fn to_frames(&self) -> Result<Vec<SseFrame>, serde_json::Error> {
        Ok(match self {
            PipelineEvent::Open => vec![SseFrame::open()],
            PipelineEvent::Heartbeat => vec![SseFrame::heartbeat()],
            PipelineEvent::StageCompleted { stage, payload } => {
                vec![SseFrame::event(stage.phase(), payload)?]
            }
            PipelineEvent::Failed(failure) => vec![
                SseFrame::event(
                    ERROR_EVENT,
                    &json!({ "stage": failure.stage.phase(), "msg": failure.message }),
                )?,
                SseFrame::event(DONE_PHASE, &json!({ "error": failure.code() }))?,
            ],
            PipelineEvent::Done(report) => vec![SseFrame::event(DONE_PHASE, &**report)?],
        })
    }

    /// Phase and payload to merge into the partial record, if this event completes one.
    ///
    /// Failures record nothing.
    pub fn phase_record(&self) -> Option<(&'static str, Value)> {
        match self {
            PipelineEvent::StageCompleted { stage, payload } => Some((stage.phase(), payload.clone())),
            PipelineEvent::Done(report) => serde_json::to_value(&**report)
                .ok()
                .map(|value| (DONE_PHASE, value)),
            _ => None,
        }
    }
}
