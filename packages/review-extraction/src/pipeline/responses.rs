//! Response shapes for every structured model call.
//!
//! The structs define the JSON schema sent to the model (via `schemars`).
//! Parsing goes the other way through [`coerce`](super::coerce): each
//! `from_value` accepts loosely-shaped output and never fails.

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::coerce::{coerce_bool, coerce_score, coerce_string_list, is_empty_value, string_field};

/// Strict JSON schema for a response type.
///
/// Every object gets `additionalProperties: false` with all properties
/// required, `$ref`s are inlined, and the root carries the type's name as
/// `title` so providers (and the test mock) can tell calls apart.
pub trait ResponseSchema: JsonSchema {
    fn response_schema() -> Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = value.get("definitions").cloned();
        if let Some(defs) = definitions {
            inline_definitions(&mut value, &defs);
        }
        close_objects(&mut value);

        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
            map.insert("title".into(), Value::String(Self::schema_name()));
        }
        value
    }
}

impl<T: JsonSchema> ResponseSchema for T {}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
                let keys: Option<Vec<Value>> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect());
                if let Some(keys) = keys {
                    map.insert("required".into(), Value::Array(keys));
                }
            }
            map.values_mut().for_each(close_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_definitions(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(def) = target {
                *value = def;
                inline_definitions(value, definitions);
                return;
            }
            map.values_mut()
                .for_each(|v| inline_definitions(v, definitions));
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| inline_definitions(v, definitions)),
        _ => {}
    }
}

// =============================================================================
// Relevance
// =============================================================================

/// Relevance verdicts for one batch of units.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct RelevanceResponse {
    pub classifications: Vec<UnitClassification>,
}

/// Verdict for a single unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnitClassification {
    /// Zero-based index of the unit within the batch
    pub index: usize,
    /// Whether the unit may contain any of the target fields
    pub relevant: bool,
    /// Confidence between 0 and 1
    pub confidence: f64,
    /// A few words explaining the verdict
    pub reason: String,
}

impl RelevanceResponse {
    pub fn from_value(value: &Value) -> Self {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("classifications")
                .or_else(|| other.get("units"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };

        let classifications = items
            .iter()
            .filter_map(|item| {
                let index = match item.get("index")? {
                    Value::Number(n) => n.as_u64()? as usize,
                    Value::String(s) => s.trim().parse().ok()?,
                    _ => return None,
                };
                Some(UnitClassification {
                    index,
                    relevant: item.get("relevant").and_then(coerce_bool).unwrap_or(true),
                    confidence: item.get("confidence").map_or(0.5, coerce_score),
                    reason: string_field(item, "reason"),
                })
            })
            .collect();

        Self { classifications }
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// One verbatim quote per extracted value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct QuoteResponse {
    pub quotes: Vec<FieldQuote>,
}

/// Supporting quote for one field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldQuote {
    /// Field name exactly as given
    pub field: String,
    /// Verbatim text copied from the document
    pub quote: String,
    /// Page number if shown in the context headers
    pub page: Option<u32>,
    /// Confidence between 0 and 1
    pub confidence: f64,
}

impl QuoteResponse {
    /// Accepts `{"quotes": [...]}`, a bare list, or a `{field: quote}` map.
    pub fn from_value(value: &Value) -> Self {
        let inner = value.get("quotes").unwrap_or(value);
        let quotes = match inner {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| {
                    let field = string_field(item, "field");
                    if field.is_empty() {
                        return None;
                    }
                    Some(FieldQuote {
                        field,
                        quote: string_field(item, "quote"),
                        page: item
                            .get("page")
                            .and_then(Value::as_u64)
                            .and_then(|p| u32::try_from(p).ok()),
                        confidence: item.get("confidence").map_or(0.7, coerce_score),
                    })
                })
                .collect(),
            Value::Object(map) => quotes_from_map(map),
            _ => Vec::new(),
        };
        Self { quotes }
    }

    /// Quote for `field`, if the model gave a non-empty one.
    pub fn quote_for(&self, field: &str) -> Option<&FieldQuote> {
        self.quotes
            .iter()
            .find(|q| q.field == field && !q.quote.trim().is_empty())
    }
}

fn quotes_from_map(map: &Map<String, Value>) -> Vec<FieldQuote> {
    map.iter()
        .filter(|(_, v)| !is_empty_value(v))
        .map(|(field, v)| {
            let (quote, confidence) = match v {
                Value::Object(_) => (
                    string_field(v, "quote"),
                    v.get("confidence").map_or(0.7, coerce_score),
                ),
                Value::String(s) => (s.trim().to_string(), 0.7),
                other => (other.to_string(), 0.7),
            };
            FieldQuote {
                field: field.clone(),
                quote,
                page: None,
                confidence,
            }
        })
        .collect()
}

// =============================================================================
// Checker
// =============================================================================

/// Accuracy and consistency review of one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct CheckResponse {
    /// How well the values match their quotes and the source (0-1)
    pub accuracy_score: f64,
    /// How well the values fit the review theme (0-1)
    pub consistency_score: f64,
    pub issues: Vec<CheckIssue>,
    /// Concrete revision instructions for the next attempt
    pub suggestions: Vec<String>,
}

/// One problem reported by the checker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckIssue {
    pub field: String,
    /// One of: inaccurate, inconsistent, missing, hallucination, unsupported, other
    pub issue_type: String,
    /// One of: low, medium, high
    pub severity: String,
    pub detail: String,
    pub suggested_fix: Option<String>,
}

impl CheckResponse {
    pub fn from_value(value: &Value) -> Self {
        let accuracy_score = value
            .get("accuracy_score")
            .or_else(|| value.get("accuracy"))
            .map_or(0.0, coerce_score);
        let consistency_score = value
            .get("consistency_score")
            .or_else(|| value.get("consistency"))
            .map_or(0.0, coerce_score);

        let issues = match value.get("issues") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => CheckIssue {
                        field: String::new(),
                        issue_type: "other".into(),
                        severity: "medium".into(),
                        detail: s.trim().to_string(),
                        suggested_fix: None,
                    },
                    _ => CheckIssue {
                        field: string_field(item, "field"),
                        issue_type: first_string(item, &["issue_type", "type"]),
                        severity: string_field(item, "severity"),
                        detail: first_string(item, &["detail", "description"]),
                        suggested_fix: Some(string_field(item, "suggested_fix"))
                            .filter(|s| !s.is_empty()),
                    },
                })
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![CheckIssue {
                field: String::new(),
                issue_type: "other".into(),
                severity: "medium".into(),
                detail: s.trim().to_string(),
                suggested_fix: None,
            }],
            _ => Vec::new(),
        };

        Self {
            accuracy_score,
            consistency_score,
            issues,
            suggestions: value
                .get("suggestions")
                .map(coerce_string_list)
                .unwrap_or_default(),
        }
    }
}

fn first_string(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| string_field(value, key))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

// =============================================================================
// Auditor
// =============================================================================

/// Judgment of whether located quotes support their values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct AuditResponse {
    /// Overall support score (0-1)
    pub score: f64,
    pub judgments: Vec<QuoteJudgment>,
}

/// Judgment for one (field, value, quote) triple.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuoteJudgment {
    pub field: String,
    /// Whether the quote supports the value for this field
    pub is_correct: bool,
    /// One of: low, medium, high
    pub severity: String,
    pub explanation: String,
}

impl AuditResponse {
    pub fn from_value(value: &Value) -> Self {
        let judgments = value
            .get("judgments")
            .or_else(|| value.get("findings"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let field = string_field(item, "field");
                        if field.is_empty() {
                            return None;
                        }
                        Some(QuoteJudgment {
                            field,
                            is_correct: item
                                .get("is_correct")
                                .and_then(coerce_bool)
                                .unwrap_or(false),
                            severity: string_field(item, "severity"),
                            explanation: string_field(item, "explanation"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            score: value.get("score").map_or(0.0, coerce_score),
            judgments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_schema_is_strict_and_titled() {
        let schema = CheckResponse::response_schema();
        assert_eq!(schema["title"], "CheckResponse");
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema.get("definitions").is_none());

        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
    }

    #[test]
    fn test_check_response_tolerates_percentages_and_strings() {
        let parsed = CheckResponse::from_value(&json!({
            "accuracy_score": 90,
            "consistency_score": "0.5",
            "issues": "sample size looks off",
            "suggestions": "Re-check table 1"
        }));
        assert_eq!(parsed.accuracy_score, 0.9);
        assert_eq!(parsed.consistency_score, 0.5);
        assert_eq!(parsed.issues.len(), 1);
        assert_eq!(parsed.suggestions, vec!["Re-check table 1".to_string()]);
    }

    #[test]
    fn test_quote_response_accepts_map_form() {
        let parsed = QuoteResponse::from_value(&json!({
            "sample_size": "A total of 42 patients",
            "country": ""
        }));
        assert_eq!(parsed.quotes.len(), 1);
        assert_eq!(
            parsed.quote_for("sample_size").map(|q| q.quote.as_str()),
            Some("A total of 42 patients")
        );
    }

    #[test]
    fn test_relevance_response_skips_items_without_index() {
        let parsed = RelevanceResponse::from_value(&json!({
            "classifications": [
                {"index": 0, "relevant": "yes", "confidence": 80},
                {"relevant": false},
                {"index": "2", "relevant": false, "confidence": 0.9, "reason": "refs"}
            ]
        }));
        assert_eq!(parsed.classifications.len(), 2);
        assert!(parsed.classifications[0].relevant);
        assert_eq!(parsed.classifications[0].confidence, 0.8);
        assert_eq!(parsed.classifications[1].index, 2);
    }
}
