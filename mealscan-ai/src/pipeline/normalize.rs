//! Lenient number coercion and ingredient name keys
//!
//! Model output is loosely typed: grams arrive as `200`, `"200"`, `"~200 g"` or
//! `"1,200"`, confidences as `0.8` or `"80%"`. Coercion takes the first numeric
//! token and falls back to a caller default instead of failing the stage.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+(\.\d+)?").expect("number token pattern"));

/// Cooking-method tags dropped when matching names
const METHOD_TAGS: &[&str] = &[
    "(cooked)",
    "(fried)",
    "(grilled)",
    "(baked)",
    "(boiled)",
    "(steamed)",
    "(roasted)",
    "(raw)",
];

/// Canonical key every added fat collapses to
pub const COOKING_OIL_KEY: &str = "cooking oil";

/// Coerce a JSON value to `f64`.
///
/// Numbers pass through; strings yield their first numeric token after
/// thousands separators are removed; anything else (or a non-finite number)
/// yields `default`.
pub fn coerce_number(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(default),
        Some(Value::String(s)) => coerce_str(s, default),
        _ => default,
    }
}

/// String form of [`coerce_number`]
pub fn coerce_str(text: &str, default: f64) -> f64 {
    let cleaned = text.replace(',', "");
    NUMBER_TOKEN
        .find(cleaned.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .unwrap_or(default)
}

/// Matching key for an ingredient name.
///
/// Lowercase, trim, drop cooking-method tags. Any name containing "oil"
/// becomes [`COOKING_OIL_KEY`] so added fat is attributed to a single line.
pub fn name_key(name: &str) -> String {
    let mut key = name.trim().to_lowercase();
    for tag in METHOD_TAGS {
        key = key.replace(tag, "");
    }
    if key.contains("oil") {
        return COOKING_OIL_KEY.to_string();
    }
    key.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased, trimmed text of a JSON string (or scalar), `None` if empty
pub fn clean_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Non-empty string field kept verbatim (notes, methods)
pub fn optional_note(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_numbers_and_embedded_tokens() {
        assert_eq!(coerce_number(Some(&json!(12)), 0.0), 12.0);
        assert_eq!(coerce_number(Some(&json!(0.75)), 0.0), 0.75);
        assert_eq!(coerce_number(Some(&json!("95%")), 0.0), 95.0);
        assert_eq!(coerce_number(Some(&json!("~12")), 0.0), 12.0);
        assert_eq!(coerce_number(Some(&json!("≈3.5")), 0.0), 3.5);
        assert_eq!(coerce_number(Some(&json!("1,200 g")), 0.0), 1200.0);
        assert_eq!(coerce_number(Some(&json!("-4")), 0.0), -4.0);
    }

    #[test]
    fn test_coerce_falls_back_to_default() {
        assert_eq!(coerce_number(Some(&json!("about a handful")), 0.6), 0.6);
        assert_eq!(coerce_number(Some(&json!(null)), 1.5), 1.5);
        assert_eq!(coerce_number(Some(&json!([1, 2])), 2.0), 2.0);
        assert_eq!(coerce_number(None, 7.0), 7.0);
        assert_eq!(coerce_str("", 3.0), 3.0);
    }

    #[test]
    fn test_name_key_strips_method_tags() {
        assert_eq!(name_key("  Chicken (Fried) "), "chicken");
        assert_eq!(name_key("Rice (cooked)"), "rice");
        assert_eq!(name_key("salmon  (grilled)"), "salmon");
    }

    #[test]
    fn test_name_key_collapses_oils() {
        assert_eq!(name_key("Olive Oil"), COOKING_OIL_KEY);
        assert_eq!(name_key("sesame oil (fried)"), COOKING_OIL_KEY);
        assert_eq!(name_key("oil"), COOKING_OIL_KEY);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(Some(&json!("  Ramen "))), Some("ramen".to_string()));
        assert_eq!(clean_text(Some(&json!("   "))), None);
        assert_eq!(clean_text(Some(&json!({"a": 1}))), None);
        assert_eq!(clean_text(None), None);
    }

    #[test]
    fn test_optional_note() {
        assert_eq!(optional_note(Some(&json!("pan-fried"))), Some("pan-fried".into()));
        assert_eq!(optional_note(Some(&json!(""))), None);
        assert_eq!(optional_note(Some(&json!(null))), None);
    }
}
