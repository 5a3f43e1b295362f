//! Normalization of model output at the schema boundary.
//!
//! Model responses are tolerated, not trusted: scores may arrive as
//! percentages or strings, lists as single strings, numbers as prose.
//! Everything here is pure and never fails; unusable input becomes a
//! neutral value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::types::schema::FieldType;

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid regex"));

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("valid regex"));

/// Placeholders models use for "nothing here".
const EMPTY_MARKERS: &[&str] = &[
    "n/a",
    "na",
    "none",
    "null",
    "nil",
    "not reported",
    "not stated",
    "not available",
    "not applicable",
    "unknown",
    "-",
];

/// True for null, blank strings, placeholder strings and empty containers.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || EMPTY_MARKERS.contains(&trimmed.to_lowercase().as_str())
        }
        Value::Array(items) => items.iter().all(is_empty_value),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Unwrap `{"data": {...}}` / `{"fields": {...}}` wrappers some models add.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 => {
            let key = map.keys().next().cloned().unwrap_or_default();
            if matches!(key.as_str(), "data" | "fields" | "values" | "result")
                && map.get(&key).is_some_and(Value::is_object)
            {
                map.remove(&key).unwrap_or(Value::Null)
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

/// Coerce a raw model value to the declared field type.
///
/// Empty-like values become `null`. Values that cannot be converted keep
/// their trimmed text so nothing the model said is silently lost.
pub fn coerce_field(raw: &Value, field_type: FieldType) -> Value {
    if is_empty_value(raw) {
        return Value::Null;
    }

    match field_type {
        FieldType::Text | FieldType::Identifier => coerce_text(raw, field_type),
        FieldType::Integer => coerce_integer(raw),
        FieldType::Year => coerce_year(raw),
        FieldType::Number => coerce_number(raw),
        FieldType::List => Value::Array(
            coerce_string_list(raw)
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
        FieldType::Boolean => coerce_bool(raw).map_or_else(|| text_of(raw), Value::Bool),
    }
}

fn text_of(raw: &Value) -> Value {
    match raw {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => Value::String(other.to_string()),
    }
}

fn coerce_text(raw: &Value, field_type: FieldType) -> Value {
    match raw {
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = if field_type == FieldType::Identifier {
                trimmed.trim_end_matches(['.', ',', ';', ')'])
            } else {
                trimmed
            };
            Value::String(trimmed.to_string())
        }
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Array(items) => Value::String(
            items
                .iter()
                .filter(|v| !is_empty_value(v))
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Value::String(other.to_string()),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let m = FIRST_NUMBER.find(text)?;
    m.as_str().replace(',', "").parse::<f64>().ok()
}

fn coerce_integer(raw: &Value) -> Value {
    let number = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    match number {
        Some(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Value::from(n as i64),
        Some(n) => serde_json::Number::from_f64(n).map_or_else(|| text_of(raw), Value::Number),
        None => text_of(raw),
    }
}

fn coerce_year(raw: &Value) -> Value {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(year) if (1800..=2100).contains(&year) => Value::from(year),
            _ => text_of(raw),
        },
        Value::String(s) => YEAR
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map_or_else(|| text_of(raw), Value::from),
        _ => text_of(raw),
    }
}

fn coerce_number(raw: &Value) -> Value {
    match raw {
        Value::Number(_) => raw.clone(),
        Value::String(s) => parse_number(s)
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| text_of(raw), Value::Number),
        _ => text_of(raw),
    }
}

/// Coerce a score to [0, 1].
///
/// Values in (1, 100] are read as percentages. Anything unparseable is 0.
pub fn coerce_score(raw: &Value) -> f64 {
    let score = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let is_percent = trimmed.ends_with('%');
            parse_number(trimmed).map(|n| if is_percent { n / 100.0 } else { n })
        }
        _ => None,
    };

    match score {
        Some(s) if s.is_finite() => {
            let s = if s > 1.0 && s <= 100.0 { s / 100.0 } else { s };
            s.clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Coerce a string-or-list value to a list of non-empty strings.
pub fn coerce_string_list(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .filter(|v| !is_empty_value(v))
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                Value::Object(map) => object_text(map),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => s
            .split(['\n', ';'])
            .map(|part| part.trim().trim_start_matches(['-', '*', '•']).trim())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// Prefer a descriptive member of an object over its JSON rendering.
fn object_text(map: &Map<String, Value>) -> String {
    ["suggestion", "text", "description", "detail"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| Value::Object(map.clone()).to_string())
}

/// Coerce yes/no style values to a bool.
pub fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "relevant" => Some(true),
            "false" | "no" | "n" | "0" | "irrelevant" | "not relevant" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Read a string member, defaulting to empty.
pub fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
