//! Prompt text for the three stage calls

use crate::pipeline::stages::MassItem;

const SCALE_HINT: &str = "Cutlery or chopsticks in frame are a size reference \
(dinner fork about 19 cm, chopsticks about 24 cm). When several photos show the same \
plate from different angles, combine them into one answer.";

/// Recognize: dish + likely ingredients
pub fn recognize_prompt() -> String {
    format!(
        "Identify the meal in the photos.\n{}\n\n\
         Reply with JSON only:\n\
         {{\"dish\": string, \"ingredients\": [string, up to 12, lowercase], \
         \"container\": \"plate|bowl|tray|cup|none\", \"confidence\": number 0..1}}",
        SCALE_HINT
    )
}

/// Quantify: one gram estimate per ingredient
pub fn quantify_prompt(dish_hint: &str, ingredient_hints: &[String]) -> String {
    let dish = if dish_hint.is_empty() { "(unknown)" } else { dish_hint };
    let hints = if ingredient_hints.is_empty() {
        "(infer from the photos)".to_string()
    } else {
        ingredient_hints.join(", ")
    };

    format!(
        "Estimate the edible mass of each ingredient for one serving.\n\
         Dish: {}\nLikely ingredients: {}\n{}\n\n\
         Rules: one gram value per ingredient, never negative. Report added fat as a \
         single \"cooking oil\" item (0 g if none is expected). Leave out plates, \
         wrappers and utensils. total_grams is the sum of the items.\n\n\
         Reply with JSON only:\n\
         {{\"items\": [{{\"name\": string, \"grams\": number, \"note\": string}}], \
         \"total_grams\": number, \"confidence\": number 0..1, \"notes\": string}}",
        dish, hints, SCALE_HINT
    )
}

/// Price: macros per quantified ingredient
pub fn price_prompt(dish: &str, items: &[MassItem]) -> String {
    let oil_grams: f64 = items
        .iter()
        .filter(|i| i.name.contains("oil"))
        .map(|i| i.grams)
        .sum();
    let listing = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    let dish = if dish.is_empty() { "(unknown)" } else { dish };

    format!(
        "Estimate calories and macronutrients for these cooked ingredients.\n\
         Dish: {}\nItems with grams: {}\n\n\
         Added cooking oil in this meal: {:.1} g. When it is above zero, every other \
         item keeps only its intrinsic fat and all added oil belongs to the \
         \"cooking oil\" item.\n\
         Keep item order and names. kcal should roughly equal 4*protein + 4*carbs + 9*fat.\n\n\
         Reply with JSON only, keys: items ([{{\"name\", \"kcal\", \"protein_g\", \
         \"carbs_g\", \"fat_g\", \"method\"}}]), total_kcal, total_protein_g, \
         total_carbs_g, total_fat_g, confidence, notes",
        dish, listing, oil_grams
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantify_prompt_includes_hints() {
        let prompt = quantify_prompt("ramen", &["noodles".to_string(), "broth".to_string()]);
        assert!(prompt.contains("Dish: ramen"));
        assert!(prompt.contains("noodles, broth"));
    }

    #[test]
    fn test_price_prompt_reports_oil() {
        let items = vec![
            MassItem {
                name: "cooking oil".into(),
                grams: 12.0,
                note: None,
            },
            MassItem {
                name: "rice".into(),
                grams: 150.0,
                note: None,
            },
        ];
        let prompt = price_prompt("fried rice", &items);
        assert!(prompt.contains("12.0 g"));
        assert!(prompt.contains("\"rice\""));
    }
}
