//! External multimodal inference service
//!
//! The three stage calls are opaque request/response exchanges. Implementations
//! return the raw JSON object from the service; typing and normalization happen
//! in [`crate::pipeline::stages`].

pub mod gemini;
pub mod prompts;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use crate::pipeline::stages::{MassItem, StageError};

pub use gemini::GeminiClient;

/// Recognize: which dish, which ingredients
#[derive(Debug, Clone)]
pub struct RecognizeRequest {
    pub model: String,
    pub image_paths: Vec<PathBuf>,
}

/// Quantify: grams per ingredient, hinted by the recognition
#[derive(Debug, Clone)]
pub struct QuantifyRequest {
    pub model: String,
    pub image_paths: Vec<PathBuf>,
    pub dish_hint: String,
    pub ingredient_hints: Vec<String>,
}

/// Price: macros for the quantified ingredients
#[derive(Debug, Clone)]
pub struct PriceRequest {
    pub model: String,
    pub dish: String,
    pub items: Vec<MassItem>,
}

/// Stage calls into the inference backend.
///
/// Each call may take tens of seconds. Implementations impose their own
/// request deadline, if any.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn recognize(&self, request: &RecognizeRequest) -> Result<Value, StageError>;

    async fn quantify(&self, request: &QuantifyRequest) -> Result<Value, StageError>;

    async fn price(&self, request: &PriceRequest) -> Result<Value, StageError>;
}
