//! Lenient numeric coercion for untyped scalar input.
//!
//! Upstream payloads and hand-edited data files carry numbers as JSON numbers,
//! numeric strings, empty strings or nulls. Everything that is not a finite
//! number collapses to `None`; callers treat `None` as missing data.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Coerce a JSON scalar to a finite `f64`.
///
/// Numbers pass through (if finite); strings are trimmed and parsed; null,
/// blank strings, booleans, arrays and objects yield `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number_str(s),
        _ => None,
    }
}

/// Coerce a raw string (query parameter, XML attribute) to a finite `f64`.
pub fn parse_number_str(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Round to the nearest multiple of `increment`.
pub fn round_to(value: f64, increment: f64) -> f64 {
    (value / increment).round() * increment
}

/// serde adapter: `#[serde(default, deserialize_with = "lenient_number")]`.
pub fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_number))
}
