//! Gemini `generateContent` REST client
//!
//! Each stage makes up to two attempts: a free-form one, then one in JSON
//! response mode if the first reply did not contain a JSON object with the
//! stage's required keys.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Url};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{prompts, InferenceService, PriceRequest, QuantifyRequest, RecognizeRequest};
use crate::config::InferenceConfig;
use crate::pipeline::stages::{Stage, StageError};
use mealscan_common::{Error, Result};

const RECOGNIZE_KEYS: &[&str] = &["dish"];
const QUANTIFY_KEYS: &[&str] = &["items"];
const PRICE_KEYS: &[&str] = &[
    "items",
    "total_kcal",
    "total_protein_g",
    "total_carbs_g",
    "total_fat_g",
    "confidence",
];

/// Longest raw reply kept on a stage error
const RAW_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy)]
enum Attempt {
    FreeForm,
    JsonMode,
}

pub struct GeminiClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig, api_key: Option<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_output_tokens: config.max_output_tokens,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// `generateContent` URL for `model`, which is always a single path segment
    fn endpoint(&self, model: &str) -> std::result::Result<Url, String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| format!("invalid inference base URL: {}", e))?;
        url.path_segments_mut()
            .map_err(|_| "inference base URL cannot take a path".to_string())?
            .pop_if_empty()
            .extend(["v1beta", "models", &format!("{}:generateContent", model)]);
        Ok(url)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        model: &str,
        parts: Vec<Value>,
        required: &[&str],
    ) -> std::result::Result<Value, StageError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StageError::new(stage, "inference service not configured"))?;

        let first = self
            .generate(stage, api_key, model, &parts, Attempt::FreeForm)
            .await?;
        if let Some(object) = first_json_block(&first).filter(|o| missing_keys(o, required).is_empty()) {
            return Ok(Value::Object(object));
        }
        debug!(stage = %stage, "Free-form reply unusable, retrying in JSON mode");

        let second = self
            .generate(stage, api_key, model, &parts, Attempt::JsonMode)
            .await?;
        match first_json_block(&second) {
            Some(object) if missing_keys(&object, required).is_empty() => Ok(Value::Object(object)),
            other => {
                let missing = other
                    .map(|o| missing_keys(&o, required))
                    .unwrap_or_else(|| required.iter().map(|k| k.to_string()).collect());
                let raw = if second.trim().is_empty() { first } else { second };
                Err(
                    StageError::new(stage, format!("reply missing keys: {}", missing.join(", ")))
                        .with_raw(truncate(&raw, RAW_LIMIT)),
                )
            }
        }
    }

    async fn generate(
        &self,
        stage: Stage,
        api_key: &str,
        model: &str,
        parts: &[Value],
        attempt: Attempt,
    ) -> std::result::Result<String, StageError> {
        let url = self.endpoint(model).map_err(|e| StageError::new(stage, e))?;
        let body = request_body(parts, attempt, self.max_output_tokens);

        let response = self
            .http_client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StageError::new(stage, format!("inference request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StageError::new(stage, format!("inference response unreadable: {}", e)))?;

        if !status.is_success() {
            warn!(stage = %stage, %status, "Inference service returned error");
            return Err(
                StageError::new(stage, format!("inference service returned {}", status))
                    .with_raw(truncate(&text, RAW_LIMIT)),
            );
        }

        let envelope: Value = serde_json::from_str(&text).map_err(|e| {
            StageError::new(stage, format!("inference envelope not JSON: {}", e))
                .with_raw(truncate(&text, RAW_LIMIT))
        })?;
        Ok(reply_text(&envelope))
    }
}

#[async_trait]
impl InferenceService for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn recognize(&self, request: &RecognizeRequest) -> std::result::Result<Value, StageError> {
        let mut parts = vec![json!({ "text": prompts::recognize_prompt() })];
        parts.extend(image_parts(Stage::Recognize, &request.image_paths).await?);
        self.run_stage(Stage::Recognize, &request.model, parts, RECOGNIZE_KEYS)
            .await
    }

    async fn quantify(&self, request: &QuantifyRequest) -> std::result::Result<Value, StageError> {
        let prompt = prompts::quantify_prompt(&request.dish_hint, &request.ingredient_hints);
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(image_parts(Stage::Quantify, &request.image_paths).await?);
        self.run_stage(Stage::Quantify, &request.model, parts, QUANTIFY_KEYS)
            .await
    }

    async fn price(&self, request: &PriceRequest) -> std::result::Result<Value, StageError> {
        let parts = vec![json!({ "text": prompts::price_prompt(&request.dish, &request.items) })];
        self.run_stage(Stage::Price, &request.model, parts, PRICE_KEYS)
            .await
    }
}

fn request_body(parts: &[Value], attempt: Attempt, max_output_tokens: u32) -> Value {
    let generation_config = match attempt {
        Attempt::FreeForm => json!({
            "temperature": 0.2,
            "maxOutputTokens": max_output_tokens,
        }),
        Attempt::JsonMode => json!({
            "temperature": 0.0,
            "maxOutputTokens": max_output_tokens,
            "responseMimeType": "application/json",
        }),
    };

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

async fn image_parts(stage: Stage, paths: &[PathBuf]) -> std::result::Result<Vec<Value>, StageError> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StageError::new(stage, "cannot read uploaded image")
                .with_raw(format!("{}: {}", path.display(), e))
        })?;
        parts.push(json!({
            "inline_data": {
                "mime_type": mime_for(path),
                "data": STANDARD.encode(bytes),
            }
        }));
    }
    Ok(parts)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "image/webp",
    }
}

/// Concatenated text parts of the first candidate
fn reply_text(envelope: &Value) -> String {
    envelope
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// First JSON object in a model reply.
///
/// Accepts a bare object, a fenced code block, or an object embedded in prose
/// (outermost braces).
pub fn first_json_block(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        return Some(object);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn missing_keys(object: &Map<String, Value>, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|k| !object.contains_key(**k))
        .map(|k| k.to_string())
        .collect()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
