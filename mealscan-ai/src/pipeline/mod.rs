//! Analysis pipeline
//!
//! Recognize → Quantify → Price, each stage bridged onto a live event stream.

pub mod events;
pub mod heartbeat;
pub mod normalize;
pub mod orchestrator;
pub mod payload;
pub mod stages;
pub mod state;

pub use orchestrator::{
    validate_model, AnalysisRequest, InvalidModel, Pipeline, PipelineConfig, PipelineEvent,
    PipelineFailure,
};
pub use payload::AnalysisReport;
pub use stages::{Stage, StageError};
