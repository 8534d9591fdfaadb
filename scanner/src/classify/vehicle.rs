use serde::{Deserialize, Deserializer, Serialize};

/// Result of spotting a vehicle in frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSpotting {
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Model year or range, as reported ("2019", "2016-2018").
    #[serde(default, deserialize_with = "string_or_number")]
    pub year: Option<String>,
    #[serde(default)]
    pub spot_score: Option<f64>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

impl VehicleSpotting {
    /// "Make Model" when both are known.
    pub fn label(&self) -> Option<String> {
        match (&self.make, &self.model) {
            (Some(make), Some(model)) => Some(format!("{make} {model}")),
            (Some(make), None) => Some(make.clone()),
            (None, Some(model)) => Some(model.clone()),
            (None, None) => None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vehicle_payload() {
        let json = r#"{
            "vehicleType": "sports car",
            "make": "Porsche",
            "model": "911",
            "year": "2019",
            "spotScore": 87,
            "confidenceScore": 0.9,
            "disclaimer": "AI estimate."
        }"#;
        let spotting: VehicleSpotting = serde_json::from_str(json).unwrap();
        assert_eq!(spotting.label().as_deref(), Some("Porsche 911"));
        assert_eq!(spotting.spot_score, Some(87.0));
        assert_eq!(spotting.year.as_deref(), Some("2019"));
    }

    #[test]
    fn numeric_year_is_accepted() {
        let spotting: VehicleSpotting =
            serde_json::from_str(r#"{"make": "Toyota", "year": 2004}"#).unwrap();
        assert_eq!(spotting.year.as_deref(), Some("2004"));
        assert_eq!(spotting.label().as_deref(), Some("Toyota"));
    }

    #[test]
    fn label_absent_without_make_or_model() {
        let spotting: VehicleSpotting = serde_json::from_str("{}").unwrap();
        assert!(spotting.label().is_none());
    }
}
