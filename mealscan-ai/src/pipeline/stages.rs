//! Pipeline stages and their typed outputs
//!
//! Each stage turns the raw JSON object returned by the inference service into
//! a typed value. Later stages only ever see these types, never the raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use super::normalize::{clean_text, coerce_number, optional_note};
use mealscan_common::time::round_to;

/// Most ingredients kept from recognition
pub const MAX_DETECTED_INGREDIENTS: usize = 12;

/// Confidence used when quantify/price report none
pub const DEFAULT_ESTIMATE_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Recognize,
    Quantify,
    Price,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Recognize, Stage::Quantify, Stage::Price];

    /// SSE event / partial record phase name
    pub fn phase(self) -> &'static str {
        match self {
            Stage::Recognize => "recognize",
            Stage::Quantify => "ing_quant",
            Stage::Price => "calories",
        }
    }

    /// Code reported when this stage fails
    pub fn failure_code(self) -> &'static str {
        match self {
            Stage::Recognize => "recognition_failed",
            Stage::Quantify => "ingredients_failed",
            Stage::Price => "calories_failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase())
    }
}

/// A stage failed. `raw` holds the upstream text for operators and is never sent to clients.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
    pub raw: Option<String>,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.stage.failure_code()
    }
}

/// Output of Recognize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub dish: String,
    pub ingredients: Vec<String>,
    pub confidence: f64,
}

/// One ingredient with its estimated mass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassItem {
    pub name: String,
    pub grams: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Output of Quantify
#[derive(Debug, Clone, PartialEq)]
pub struct Quantification {
    pub items: Vec<MassItem>,
    /// Total as reported by the model; only used for consistency logging
    pub reported_total_grams: Option<f64>,
    pub confidence: f64,
    pub notes: Option<String>,
}

/// Macros for one ingredient as reported by Price
#[derive(Debug, Clone, PartialEq)]
pub struct NutritionItem {
    pub name: String,
    pub kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub method: Option<String>,
}

/// Model-reported totals of a Price response
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReportedTotals {
    pub kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

/// Output of Price
#[derive(Debug, Clone, PartialEq)]
pub struct Pricing {
    pub items: Vec<NutritionItem>,
    pub reported: ReportedTotals,
    pub confidence: f64,
    pub notes: Option<String>,
}

fn object<'a>(stage: Stage, raw: &'a Value) -> Result<&'a serde_json::Map<String, Value>, StageError> {
    raw.as_object().ok_or_else(|| {
        StageError::new(stage, "response is not a JSON object").with_raw(raw.to_string())
    })
}

fn item_array<'a>(stage: Stage, raw: &'a Value) -> Result<&'a Vec<Value>, StageError> {
    object(stage, raw)?
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StageError::new(stage, "response has no items list").with_raw(raw.to_string()))
}

/// Parse a Recognize response; `dish` is required
pub fn parse_recognition(raw: &Value) -> Result<Recognition, StageError> {
    let fields = object(Stage::Recognize, raw)?;
    let dish = clean_text(fields.get("dish")).ok_or_else(|| {
        StageError::new(Stage::Recognize, "response has no dish").with_raw(raw.to_string())
    })?;

    let ingredients = fields
        .get("ingredients")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|v| clean_text(Some(v)))
                .take(MAX_DETECTED_INGREDIENTS)
                .collect()
        })
        .unwrap_or_default();

    Ok(Recognition {
        dish,
        ingredients,
        confidence: round_to(coerce_number(fields.get("confidence"), 0.0), 2),
    })
}

/// Parse a Quantify response; `items` is required.
///
/// Items carry `grams`, or the older `grams_low`/`grams_high` pair which is
/// collapsed to its midpoint. Negative masses clamp to 0; nameless items are dropped.
pub fn parse_quantification(raw: &Value) -> Result<Quantification, StageError> {
    let list = item_array(Stage::Quantify, raw)?;

    let items = list
        .iter()
        .filter_map(|entry| {
            let name = clean_text(entry.get("name"))?;
            let grams = if entry.get("grams").is_some() {
                coerce_number(entry.get("grams"), 0.0)
            } else {
                let low = coerce_number(entry.get("grams_low"), 0.0);
                let high = coerce_number(entry.get("grams_high"), low).max(low);
                (low + high) / 2.0
            };
            Some(MassItem {
                name,
                grams: grams.max(0.0),
                note: optional_note(entry.get("note")),
            })
        })
        .collect();

    let reported_total_grams = raw
        .get("total_grams")
        .map(|v| coerce_number(Some(v), f64::NAN))
        .filter(|v| v.is_finite());

    Ok(Quantification {
        items,
        reported_total_grams,
        confidence: round_to(
            coerce_number(raw.get("confidence"), DEFAULT_ESTIMATE_CONFIDENCE),
            2,
        ),
        notes: optional_note(raw.get("notes")),
    })
}

/// Parse a Price response; `items` is required
pub fn parse_pricing(raw: &Value) -> Result<Pricing, StageError> {
    let list = item_array(Stage::Price, raw)?;

    let items = list
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str)?.trim().to_string();
            Some(NutritionItem {
                name,
                kcal: coerce_number(entry.get("kcal"), 0.0).max(0.0),
                protein_g: coerce_number(entry.get("protein_g"), 0.0).max(0.0),
                carbs_g: coerce_number(entry.get("carbs_g"), 0.0).max(0.0),
                fat_g: coerce_number(entry.get("fat_g"), 0.0).max(0.0),
                method: optional_note(entry.get("method")),
            })
        })
        .collect();

    Ok(Pricing {
        items,
        reported: ReportedTotals {
            kcal: coerce_number(raw.get("total_kcal"), 0.0),
            protein_g: coerce_number(raw.get("total_protein_g"), 0.0),
            carbs_g: coerce_number(raw.get("total_carbs_g"), 0.0),
            fat_g: coerce_number(raw.get("total_fat_g"), 0.0),
        },
        confidence: round_to(
            coerce_number(raw.get("confidence"), DEFAULT_ESTIMATE_CONFIDENCE),
            2,
        ),
        notes: optional_note(raw.get("notes")),
    })
}
