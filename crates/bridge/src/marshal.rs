//! Conversion between generated content and [`AnyMap`] payloads.
//!
//! Conversion never fails. Content that is not a JSON object yields an empty
//! map; such failures are logged and counted in [`failure_count`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::warn;

use crate::any_map::{AnyMap, AnyValue};
use crate::model::GeneratedContent;

static FAILURES: AtomicU64 = AtomicU64::new(0);

/// Number of contents that could not be read as a JSON object so far.
pub fn failure_count() -> u64 {
    FAILURES.load(Ordering::Relaxed)
}

/// Read generated arguments into an [`AnyMap`].
///
/// Scalars keep their tag, arrays and objects become their JSON text and
/// `null` becomes an empty string.
pub fn content_to_any_map(content: &GeneratedContent) -> AnyMap {
    let text = content.json_string().trim();
    if text.is_empty() {
        return AnyMap::new();
    }

    let object = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            record_failure(&format!("expected an object, got {other}"));
            return AnyMap::new();
        }
        Err(e) => {
            record_failure(&e.to_string());
            return AnyMap::new();
        }
    };

    object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => AnyValue::String(s),
                Value::Bool(b) => AnyValue::Bool(b),
                Value::Number(n) => AnyValue::Double(n.as_f64().unwrap_or(f64::NAN)),
                Value::Null => AnyValue::String(String::new()),
                nested @ (Value::Array(_) | Value::Object(_)) => AnyValue::String(nested.to_string()),
            };
            (key, value)
        })
        .collect()
}

/// Write a result map back as generated content.
///
/// Only scalars are carried; nested maps and arrays are dropped. JSON has no
/// NaN or infinity, so non-finite doubles are dropped too and a map holding
/// them does not survive the trip back through [`content_to_any_map`].
/// Every dropped value is logged at `warn`.
pub fn any_map_to_content(map: &AnyMap) -> GeneratedContent {
    let mut properties = Map::new();
    for (key, value) in map.iter() {
        let value = match value {
            AnyValue::String(s) => Value::String(s.clone()),
            AnyValue::Bool(b) => Value::Bool(*b),
            AnyValue::Double(n) if n.is_finite() => Value::from(*n),
            AnyValue::Double(n) => {
                warn!(key, value = %n, "dropping non-finite number from generated content");
                continue;
            }
            other => {
                warn!(key, kind = other.type_name(), "dropping value from generated content");
                continue;
            }
        };
        properties.insert(key.to_string(), value);
    }
    GeneratedContent::from_properties(properties)
}

fn record_failure(reason: &str) {
    FAILURES.fetch_add(1, Ordering::Relaxed);
    warn!(reason, "could not read generated content, using empty arguments");
}
