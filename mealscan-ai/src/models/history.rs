//! Analysis history summaries

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of `GET /history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub id: String,
    pub dish: Option<String>,
    pub dish_confidence: f64,
    pub total_kcal: f64,
    pub total_protein_g: f64,
    pub total_carbs_g: f64,
    pub total_fat_g: f64,
    pub created_at: String,
    pub total_ms: f64,
}

impl HistorySummary {
    /// Summarize a stored `done` payload; missing numeric fields read as 0
    pub fn from_payload(id: String, created_at: String, payload: &Value) -> Self {
        let number = |key: &str| payload.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Self {
            id,
            dish: payload
                .get("dish")
                .and_then(Value::as_str)
                .map(str::to_string),
            dish_confidence: number("dish_confidence"),
            total_kcal: number("total_kcal"),
            total_protein_g: number("total_protein_g"),
            total_carbs_g: number("total_carbs_g"),
            total_fat_g: number("total_fat_g"),
            created_at,
            total_ms: number("total_ms"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_from_payload() {
        let payload = json!({
            "dish": "ramen",
            "dish_confidence": 0.8,
            "total_kcal": 620.0,
            "total_protein_g": 25.0,
            "total_ms": 1234.5
        });
        let summary = HistorySummary::from_payload("h1".into(), "t".into(), &payload);
        assert_eq!(summary.dish.as_deref(), Some("ramen"));
        assert_eq!(summary.total_kcal, 620.0);
        assert_eq!(summary.total_carbs_g, 0.0);
        assert_eq!(summary.total_ms, 1234.5);
    }
}
