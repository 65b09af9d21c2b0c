// Stored creation times come in several shapes; everything is normalized to epoch milliseconds.

use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::infrastructure::document_store::Timestamp;

// Integers below this are taken to be seconds rather than milliseconds (year ~5138 in seconds).
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Normalize a stored timestamp into epoch milliseconds.
///
/// Accepted shapes: integer or float epoch (seconds or milliseconds), numeric strings,
/// RFC 3339 strings, and `{seconds, nanoseconds}` objects (with or without a leading underscore).
pub fn normalize_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(from_epoch_integer(int))
            } else {
                number.as_f64().map(from_epoch_float)
            }
        }
        Value::String(text) => {
            let text = text.trim();
            if let Ok(int) = text.parse::<i64>() {
                return Some(from_epoch_integer(int));
            }
            if let Ok(float) = text.parse::<f64>() {
                return Some(from_epoch_float(float));
            }
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|parsed| parsed.timestamp_millis())
        }
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            // Out-of-range parts are unreadable, not clamped
            seconds.checked_mul(1000)?.checked_add(nanos / 1_000_000)
        }
        _ => None,
    }
}

fn from_epoch_integer(value: i64) -> Timestamp {
    if value.unsigned_abs() < SECONDS_CUTOFF as u64 {
        value * 1000
    } else {
        value
    }
}

fn from_epoch_float(value: f64) -> Timestamp {
    if !value.is_finite() {
        return 0;
    }
    if value.abs() < SECONDS_CUTOFF as f64 {
        (value * 1000.0) as i64
    } else {
        value as i64
    }
}

/// serde adapter: unreadable or missing timestamps sort as the epoch
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_timestamp(&value).unwrap_or(0))
}
