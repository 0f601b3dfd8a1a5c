use crate::domain::contract::RawBasket;
use anyhow::{ensure, Context};
use serde_json::Value;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parses generator output. The top-level value must be a JSON array of basket objects.
pub fn parse_baskets(text: &str) -> anyhow::Result<Vec<RawBasket>> {
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    ensure!(!trimmed.is_empty(), "generator output is empty");

    let value = serde_json::from_str::<Value>(trimmed).context("generator output is not valid JSON")?;
    ensure!(
        value.is_array(),
        "generator output must be a JSON array of baskets (got {})",
        kind(&value)
    );

    serde_json::from_value::<Vec<RawBasket>>(value)
        .context("generator output does not match the basket list shape")
}
