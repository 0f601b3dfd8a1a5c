use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Risk {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Risk::Low),
            "medium" => Ok(Risk::Medium),
            "high" => Ok(Risk::High),
            other => anyhow::bail!("invalid risk level {other:?} (expected low, medium or high)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasketType {
    Regular,
    Hybrid,
}

impl BasketType {
    /// The generator labels single-theme baskets "pure".
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "regular" | "pure" => Some(BasketType::Regular),
            "hybrid" => Some(BasketType::Hybrid),
            _ => None,
        }
    }
}

/// Parameters of one `generate` call. Never persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub investment: f64,
    pub risk: String,
    pub force_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    #[serde(rename = "52_week_low")]
    pub week52_low: f64,
    #[serde(rename = "52_week_high")]
    pub week52_high: f64,
    pub rank: i64,
    pub theme: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub theme: String,
    #[serde(rename = "type")]
    pub basket_type: BasketType,
    pub invested: f64,
    pub risk: Risk,
    pub stocks: Vec<Stock>,
}

/// The single live result. `generation_id` only advances together with a durable write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub baskets: Vec<Basket>,
    pub generation_id: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            baskets: Vec::new(),
            generation_id: 0,
            timestamp: None,
        }
    }

    /// Same generation metadata, no baskets.
    pub fn cleared(&self) -> Self {
        Self {
            baskets: Vec::new(),
            generation_id: self.generation_id,
            timestamp: self.timestamp,
        }
    }

    pub fn next_generation(&self, baskets: Vec<Basket>, now: DateTime<Utc>) -> Self {
        Self {
            baskets,
            generation_id: self.generation_id + 1,
            timestamp: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn risk_parses_case_insensitively() {
        assert_eq!(" Medium ".parse::<Risk>().unwrap(), Risk::Medium);
        assert_eq!("HIGH".parse::<Risk>().unwrap(), Risk::High);
        assert!("extreme".parse::<Risk>().is_err());
        assert!("".parse::<Risk>().is_err());
    }

    #[test]
    fn basket_type_maps_pure_to_regular() {
        assert_eq!(BasketType::from_label("pure"), Some(BasketType::Regular));
        assert_eq!(BasketType::from_label("Hybrid"), Some(BasketType::Hybrid));
        assert_eq!(BasketType::from_label("mixed"), None);
    }

    #[test]
    fn empty_snapshot_serializes_with_camel_case_keys() {
        let value = serde_json::to_value(Snapshot::empty()).unwrap();
        assert_eq!(
            value,
            json!({"baskets": [], "generationId": 0, "timestamp": null})
        );
    }

    #[test]
    fn stock_uses_52_week_wire_keys() {
        let stock = Stock {
            symbol: "AAA".to_string(),
            name: "Alpha".to_string(),
            current_price: 100.0,
            week52_low: 80.0,
            week52_high: 120.0,
            rank: 1,
            theme: "Tech".to_string(),
        };
        let value = serde_json::to_value(&stock).unwrap();
        assert_eq!(value["52_week_low"], json!(80.0));
        assert_eq!(value["52_week_high"], json!(120.0));
    }

    #[test]
    fn next_generation_increments_and_stamps() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let first = Snapshot::empty().next_generation(Vec::new(), now);
        assert_eq!(first.generation_id, 1);
        assert_eq!(first.timestamp, Some(now));

        let cleared = first.cleared();
        assert_eq!(cleared.generation_id, 1);
        assert_eq!(cleared.timestamp, Some(now));
        assert!(cleared.baskets.is_empty());
    }
}
