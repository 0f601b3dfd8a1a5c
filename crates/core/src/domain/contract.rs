use crate::domain::basket::{Basket, BasketType, Risk, Stock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const UNKNOWN_COMPANY: &str = "Unknown Company";
const UNKNOWN_STOCK_THEME: &str = "Unknown";
const UNKNOWN_BASKET_THEME: &str = "Unknown Theme";

/// A basket exactly as the generator emitted it. Every field is loosely typed
/// because the generator is not trusted to produce clean numbers or labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBasket {
    #[serde(default)]
    pub theme: Option<Value>,
    #[serde(default, rename = "type")]
    pub basket_type: Option<Value>,
    #[serde(default)]
    pub invested: Option<Value>,
    #[serde(default)]
    pub risk: Option<Value>,
    #[serde(default)]
    pub stocks: Option<Vec<RawStock>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStock {
    #[serde(default)]
    pub symbol: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub company: Option<Value>,
    #[serde(default)]
    pub current_price: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default, rename = "52_week_low", alias = "week52_low")]
    pub week52_low: Option<Value>,
    #[serde(default, rename = "52_week_high", alias = "week52_high")]
    pub week52_high: Option<Value>,
    #[serde(default)]
    pub rank: Option<Value>,
    #[serde(default)]
    pub theme: Option<Value>,
}

/// Turns generator output into persisted baskets.
///
/// Pure function of its inputs: no clock, no randomness. Running the output
/// back through it (after a JSON round trip) yields the same baskets.
pub fn normalize_baskets(raw: Vec<RawBasket>, fallback_risk: Risk) -> Vec<Basket> {
    raw.into_iter()
        .filter_map(|basket| basket.normalize(fallback_risk))
        .collect()
}

impl RawBasket {
    fn normalize(self, fallback_risk: Risk) -> Option<Basket> {
        let raw_theme = text(self.theme.as_ref());

        let stocks: Vec<Stock> = self
            .stocks
            .unwrap_or_default()
            .into_iter()
            .filter_map(|stock| stock.normalize(raw_theme.as_deref()))
            .collect();
        if stocks.is_empty() {
            return None;
        }

        let basket_type = text(self.basket_type.as_ref())
            .and_then(|label| BasketType::from_label(&label))
            .unwrap_or(BasketType::Regular);
        let risk = text(self.risk.as_ref())
            .and_then(|label| label.parse::<Risk>().ok())
            .unwrap_or(fallback_risk);

        Some(Basket {
            theme: raw_theme.unwrap_or_else(|| UNKNOWN_BASKET_THEME.to_string()),
            basket_type,
            invested: non_negative(number(self.invested.as_ref())),
            risk,
            stocks,
        })
    }
}

impl RawStock {
    fn normalize(self, basket_theme: Option<&str>) -> Option<Stock> {
        let symbol = text(self.symbol.as_ref())?;

        let name = text(self.name.as_ref())
            .or_else(|| text(self.company.as_ref()))
            .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());

        let theme = text(self.theme.as_ref())
            .or_else(|| basket_theme.map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_STOCK_THEME.to_string());

        let current_price = if is_numeric(self.current_price.as_ref()) {
            number(self.current_price.as_ref())
        } else {
            number(self.price.as_ref())
        };

        Some(Stock {
            symbol,
            name,
            current_price: non_negative(current_price),
            week52_low: non_negative(number(self.week52_low.as_ref())),
            week52_high: non_negative(number(self.week52_high.as_ref())),
            rank: number(self.rank.as_ref()).trunc() as i64,
            theme,
        })
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(s).filter(|s| !s.is_empty())
}

fn parse_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(n).filter(|n| n.is_finite())
}

fn is_numeric(value: Option<&Value>) -> bool {
    parse_number(value).is_some()
}

fn number(value: Option<&Value>) -> f64 {
    parse_number(value).unwrap_or(0.0)
}

fn non_negative(n: f64) -> f64 {
    if n > 0.0 {
        n
    } else {
        0.0
    }
}
