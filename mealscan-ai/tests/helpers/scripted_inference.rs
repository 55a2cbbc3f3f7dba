//! Inference test double
//!
//! Replies with canned JSON per stage. A stage without a reply fails with
//! that stage's error.

use async_trait::async_trait;
use mealscan_ai::pipeline::{Stage, StageError};
use mealscan_ai::services::inference::{
    InferenceService, PriceRequest, QuantifyRequest, RecognizeRequest,
};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

pub struct ScriptedInference {
    pub recognize: Option<Value>,
    pub quantify: Option<Value>,
    pub price: Option<Value>,
    pub delay: Duration,
    /// Image count seen by each recognize call
    pub seen_images: Mutex<Vec<usize>>,
    /// Model named in each recognize call
    pub seen_models: Mutex<Vec<String>>,
}

impl ScriptedInference {
    /// Ramen: 200 g noodles + 300 g broth, 620 kcal
    pub fn ramen() -> Self {
        Self {
            recognize: Some(json!({
                "dish": "ramen",
                "ingredients": ["noodles", "broth"],
                "confidence": 0.8
            })),
            quantify: Some(json!({
                "items": [
                    {"name": "noodles", "grams": 200},
                    {"name": "broth", "grams": 300}
                ],
                "total_grams": 500,
                "confidence": 0.7
            })),
            price: Some(json!({
                "items": [
                    {"name": "noodles", "kcal": 380, "protein_g": 12, "carbs_g": 70, "fat_g": 4},
                    {"name": "broth", "kcal": 240, "protein_g": 15, "carbs_g": 10, "fat_g": 12, "method": "USDA"}
                ],
                "total_kcal": 620,
                "total_protein_g": 27,
                "total_carbs_g": 80,
                "total_fat_g": 16,
                "confidence": 0.75,
                "notes": "broth estimated as tonkotsu"
            })),
            delay: Duration::ZERO,
            seen_images: Mutex::new(Vec::new()),
            seen_models: Mutex::new(Vec::new()),
        }
    }

    /// Ramen, with every stage taking `delay`
    pub fn slow_ramen(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ramen()
        }
    }

    pub fn failing_at(stage: Stage) -> Self {
        let mut script = Self::ramen();
        match stage {
            Stage::Recognize => script.recognize = None,
            Stage::Quantify => script.quantify = None,
            Stage::Price => script.price = None,
        }
        script
    }

    async fn reply(&self, stage: Stage, value: &Option<Value>) -> Result<Value, StageError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        value.clone().ok_or_else(|| {
            StageError::new(stage, "upstream returned no usable JSON").with_raw("<!doctype html>")
        })
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn recognize(&self, request: &RecognizeRequest) -> Result<Value, StageError> {
        self.seen_images.lock().unwrap().push(request.image_paths.len());
        self.seen_models.lock().unwrap().push(request.model.clone());
        self.reply(Stage::Recognize, &self.recognize).await
    }

    async fn quantify(&self, _request: &QuantifyRequest) -> Result<Value, StageError> {
        self.reply(Stage::Quantify, &self.quantify).await
    }

    async fn price(&self, _request: &PriceRequest) -> Result<Value, StageError> {
        self.reply(Stage::Price, &self.price).await
    }
}
