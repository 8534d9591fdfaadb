use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub name: String,
    #[serde(default)]
    pub portion: Option<String>,
    #[serde(default)]
    pub estimated_calories: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
}

/// Result of classifying a plate of food.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodAnalysis {
    pub food_detected: bool,
    #[serde(default)]
    pub items: Vec<FoodItem>,
    #[serde(default)]
    pub total_calories: f64,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub macros: Option<Macros>,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

impl FoodAnalysis {
    /// Sum of per-item estimates, for cross-checking `total_calories`.
    pub fn item_calories(&self) -> f64 {
        self.items.iter().map(|i| i.estimated_calories).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_payload() {
        let json = r#"{
            "foodDetected": true,
            "items": [{"name": "apple", "portion": "1 medium", "estimatedCalories": 95}],
            "totalCalories": 95,
            "confidenceScore": 0.82,
            "macros": {"protein": 0.5, "carbs": 25, "fat": 0.3},
            "disclaimer": "Estimates only."
        }"#;
        let analysis: FoodAnalysis = serde_json::from_str(json).unwrap();
        assert!(analysis.food_detected);
        assert_eq!(analysis.items[0].name, "apple");
        assert_eq!(analysis.items[0].portion.as_deref(), Some("1 medium"));
        assert_eq!(analysis.total_calories, 95.0);
        assert_eq!(analysis.item_calories(), 95.0);
        assert_eq!(analysis.macros.unwrap().carbs, 25.0);
    }

    #[test]
    fn no_food_payload_needs_only_flag() {
        let analysis: FoodAnalysis = serde_json::from_str(r#"{"foodDetected": false}"#).unwrap();
        assert!(!analysis.food_detected);
        assert!(analysis.items.is_empty());
        assert_eq!(analysis.total_calories, 0.0);
    }
}
