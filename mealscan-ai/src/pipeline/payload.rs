//! Final analysis payload
//!
//! The `done` event and the blocking `/analyze` response share this shape.
//! Totals are always recomputed from the per-item values so they agree with
//! the items a client renders.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::normalize::name_key;
use super::stages::{MassItem, NutritionItem, Pricing, Quantification, Recognition, Stage};
use mealscan_common::time::round_to;

/// Largest accepted gap between a model-reported total and the item sum
pub const TOTALS_TOLERANCE: f64 = 0.5;

/// Per-stage elapsed milliseconds, keyed by phase name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognize: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ing_quant: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
}

impl Timings {
    pub fn record(&mut self, stage: Stage, elapsed_ms: f64) {
        let slot = match stage {
            Stage::Recognize => &mut self.recognize,
            Stage::Quantify => &mut self.ing_quant,
            Stage::Price => &mut self.calories,
        };
        *slot = Some(elapsed_ms);
    }

    pub fn get(&self, stage: Stage) -> Option<f64> {
        match stage {
            Stage::Recognize => self.recognize,
            Stage::Quantify => self.ing_quant,
            Stage::Price => self.calories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEntry {
    pub name: String,
    pub kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KcalEntry {
    pub name: String,
    pub kcal: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityEntry {
    pub name: String,
    pub kcal_per_g: f64,
    pub protein_per_g: f64,
    pub carbs_per_g: f64,
    pub fat_per_g: f64,
}

/// The `done` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub dish: String,
    pub dish_confidence: f64,
    pub ingredients_detected: Vec<String>,

    pub items_grams: Vec<MassItem>,
    pub total_grams: f64,
    pub grams_confidence: f64,

    pub items_nutrition: Vec<NutritionEntry>,
    pub items_kcal: Vec<KcalEntry>,
    pub items_density: Vec<DensityEntry>,

    pub total_kcal: f64,
    pub total_protein_g: f64,
    pub total_carbs_g: f64,
    pub total_fat_g: f64,
    pub kcal_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub angles_used: usize,

    pub timings: Timings,
    pub total_ms: f64,
}

/// Everything the final payload is built from
pub struct ReportInputs<'a> {
    pub recognition: &'a Recognition,
    pub quantification: &'a Quantification,
    pub pricing: &'a Pricing,
    pub timings: Timings,
    pub total_ms: f64,
    pub angles_used: usize,
}

impl AnalysisReport {
    pub fn assemble(inputs: ReportInputs<'_>) -> Self {
        let ReportInputs {
            recognition,
            quantification,
            pricing,
            timings,
            total_ms,
            angles_used,
        } = inputs;

        let items_nutrition = match_nutrition(&quantification.items, &pricing.items);
        let items_density = densities(&quantification.items, &items_nutrition);
        let items_kcal = items_nutrition
            .iter()
            .map(|n| KcalEntry {
                name: n.name.clone(),
                kcal: n.kcal,
                method: n.method.clone(),
            })
            .collect();

        let total_grams = sum(quantification.items.iter().map(|i| i.grams));
        let total_kcal = sum(items_nutrition.iter().map(|n| n.kcal));
        let total_protein_g = sum(items_nutrition.iter().map(|n| n.protein_g));
        let total_carbs_g = sum(items_nutrition.iter().map(|n| n.carbs_g));
        let total_fat_g = sum(items_nutrition.iter().map(|n| n.fat_g));

        if let Some(reported) = quantification.reported_total_grams {
            check_total("total_grams", reported, total_grams);
        }
        check_total("total_kcal", pricing.reported.kcal, total_kcal);
        check_total("total_protein_g", pricing.reported.protein_g, total_protein_g);
        check_total("total_carbs_g", pricing.reported.carbs_g, total_carbs_g);
        check_total("total_fat_g", pricing.reported.fat_g, total_fat_g);

        Self {
            dish: recognition.dish.clone(),
            dish_confidence: round_to(recognition.confidence, 2),
            ingredients_detected: recognition.ingredients.clone(),
            items_grams: quantification.items.clone(),
            total_grams,
            grams_confidence: round_to(quantification.confidence, 2),
            items_nutrition,
            items_kcal,
            items_density,
            total_kcal,
            total_protein_g,
            total_carbs_g,
            total_fat_g,
            kcal_confidence: round_to(pricing.confidence, 2),
            notes: pricing
                .notes
                .clone()
                .or_else(|| quantification.notes.clone()),
            angles_used,
            timings,
            total_ms,
        }
    }

    /// Payload of the `calories` event: the nutrition half of the report
    pub fn calories_event(&self) -> Value {
        json!({
            "items_nutrition": self.items_nutrition,
            "items_kcal": self.items_kcal,
            "items_density": self.items_density,
            "total_kcal": self.total_kcal,
            "total_protein_g": self.total_protein_g,
            "total_carbs_g": self.total_carbs_g,
            "total_fat_g": self.total_fat_g,
            "kcal_confidence": self.kcal_confidence,
            "notes": self.notes,
            "timings": self.timings,
        })
    }
}

/// Payload of the `recognize` event
pub fn recognize_event(recognition: &Recognition, timings: &Timings) -> Value {
    json!({
        "dish": recognition.dish,
        "dish_confidence": round_to(recognition.confidence, 2),
        "ingredients_detected": recognition.ingredients,
        "timings": timings,
    })
}

/// Payload of the `ing_quant` event
pub fn ing_quant_event(quantification: &Quantification, timings: &Timings) -> Value {
    json!({
        "items_grams": quantification.items,
        "total_grams": sum(quantification.items.iter().map(|i| i.grams)),
        "grams_confidence": round_to(quantification.confidence, 2),
        "notes": quantification.notes,
        "timings": timings,
    })
}

/// Align nutrition entries with mass items, in mass-item order.
///
/// Each nutrition entry is used by at most one mass item: the first mass item
/// whose name key matches. Unmatched mass items get zeros; unmatched
/// nutrition entries are dropped.
pub fn match_nutrition(mass: &[MassItem], nutrition: &[NutritionItem]) -> Vec<NutritionEntry> {
    let keys: Vec<String> = nutrition.iter().map(|n| name_key(&n.name)).collect();
    let mut used = vec![false; nutrition.len()];

    mass.iter()
        .map(|item| {
            let key = name_key(&item.name);
            let found = keys
                .iter()
                .enumerate()
                .position(|(idx, k)| !used[idx] && *k == key);

            match found {
                Some(idx) => {
                    used[idx] = true;
                    let n = &nutrition[idx];
                    NutritionEntry {
                        name: item.name.clone(),
                        kcal: round_to(n.kcal, 2),
                        protein_g: round_to(n.protein_g, 2),
                        carbs_g: round_to(n.carbs_g, 2),
                        fat_g: round_to(n.fat_g, 2),
                        method: n.method.clone(),
                    }
                }
                None => NutritionEntry {
                    name: item.name.clone(),
                    kcal: 0.0,
                    protein_g: 0.0,
                    carbs_g: 0.0,
                    fat_g: 0.0,
                    method: None,
                },
            }
        })
        .collect()
}

/// Per-gram nutrient densities; all zero when an item has no mass
pub fn densities(mass: &[MassItem], nutrition: &[NutritionEntry]) -> Vec<DensityEntry> {
    mass.iter()
        .zip(nutrition)
        .map(|(m, n)| {
            let per_g = |value: f64| {
                if m.grams > 0.0 {
                    round_to(value / m.grams, 4)
                } else {
                    0.0
                }
            };
            DensityEntry {
                name: m.name.clone(),
                kcal_per_g: per_g(n.kcal),
                protein_per_g: per_g(n.protein_g),
                carbs_per_g: per_g(n.carbs_g),
                fat_per_g: per_g(n.fat_g),
            }
        })
        .collect()
}

fn sum(values: impl Iterator<Item = f64>) -> f64 {
    round_to(values.sum(), 2)
}

fn check_total(field: &str, reported: f64, computed: f64) {
    if (reported - computed).abs() > TOTALS_TOLERANCE {
        warn!(
            field,
            reported,
            computed,
            "Model-reported total disagrees with item sum, using item sum"
        );
    }
}
