//! Tier-0 extraction: regular expressions for fields with a fixed surface
//! form (sample sizes, identifiers, years).
//!
//! Matches are hints. High-confidence matches are offered to the model as
//! known values and fill fields the model leaves empty, but a non-empty
//! model value always wins.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExtractionError, Result};
use crate::types::schema::FieldSchema;

/// How a captured string becomes a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Digits only, as a positive integer ("1,204" → 1204)
    Count,
    /// Four-digit year between 1900 and 2100
    Year,
    /// Decimal number
    Decimal,
    /// Identifier with trailing punctuation trimmed
    Identifier,
}

impl Normalization {
    fn apply(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            Self::Count => {
                let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
                digits
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(Value::from)
            }
            Self::Year => raw
                .parse::<i64>()
                .ok()
                .filter(|y| (1900..=2100).contains(y))
                .map(Value::from),
            Self::Decimal => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            Self::Identifier => {
                let trimmed = raw.trim_end_matches(['.', ',', ';', ')', ']']);
                (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
            }
        }
    }
}

/// One regex for a field. Capture group 1 is the value.
#[derive(Debug, Clone)]
struct FieldPattern {
    regex: Regex,
    confidence: f64,
}

#[derive(Debug, Clone)]
struct FieldPatterns {
    normalization: Normalization,
    patterns: Vec<FieldPattern>,
}

/// A normalized pattern hit with its supporting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub field: String,
    pub value: Value,

    /// Verbatim source text around the match
    pub quote: String,

    pub confidence: f64,

    /// Character offset of the match in the searched text
    pub char_start: usize,
}

/// Named fields → ordered regex list.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    fields: IndexMap<String, FieldPatterns>,
    context_window: usize,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Built-in patterns: (field, normalization, [(regex, confidence)]).
const BUILTIN: &[(&str, Normalization, &[(&str, f64)])] = &[
    (
        "sample_size",
        Normalization::Count,
        &[
            (r"\b[Nn]\s*=\s*(\d[\d,]*)", 0.9),
            (
                r"(?i)\b(?:a\s+)?total\s+of\s+(\d[\d,]*)\s+(?:participants|patients|subjects|adults|children|individuals|people|women|men)",
                0.85,
            ),
            (
                r"(?i)\b(\d[\d,]*)\s+(?:participants|patients|subjects)\s+(?:were|was)\s+(?:enrolled|randomi[sz]ed|included|recruited)",
                0.85,
            ),
            (
                r"(?i)\b(?:enrolled|recruited|included|randomi[sz]ed)\s+(\d[\d,]*)\s+(?:participants|patients|subjects|adults|individuals)",
                0.8,
            ),
            (r"(?i)\bsample\s+size\s+(?:of|was)\s+(\d[\d,]*)", 0.8),
        ],
    ),
    (
        "mean_age",
        Normalization::Decimal,
        &[
            (
                r"(?i)\bmean\s+age\s*(?:was|of|:|=)?\s*(\d{1,3}(?:\.\d+)?)\s*(?:years|yrs|y\b|±|\(|\+/-)",
                0.85,
            ),
            (r"(?i)\baged?\s+(\d{1,3}(?:\.\d+)?)\s*(?:±|\+/-)", 0.75),
        ],
    ),
    (
        "publication_year",
        Normalization::Year,
        &[
            (
                r"(?i)\b(?:published(?:\s+online)?|©|copyright)\s*:?\s*(?:\d{1,2}\s+)?(?:[A-Za-z]+\s+)?((?:19|20)\d{2})\b",
                0.8,
            ),
            (r"(?i)\baccepted:?\s+\d{1,2}\s+[A-Za-z]+\s+((?:19|20)\d{2})\b", 0.7),
        ],
    ),
    (
        "doi",
        Normalization::Identifier,
        &[
            (
                r#"(?i)(?:\bdoi:?\s*|https?://(?:dx\.)?doi\.org/)(10\.\d{4,9}/[^\s"<>]+)"#,
                0.95,
            ),
            (r#"\b(10\.\d{4,9}/[^\s"<>]+)"#, 0.8),
        ],
    ),
    ("pmid", Normalization::Identifier, &[(r"(?i)\bPMID:?\s*(\d{6,9})\b", 0.95)]),
    (
        "trial_registration",
        Normalization::Identifier,
        &[
            (r"\b(NCT\d{8})\b", 0.95),
            (r"\b(ISRCTN\d{8})\b", 0.95),
            (r"\b(ACTRN\d{14})\b", 0.9),
            (r"(?i)\bEudraCT\s*(?:number|no\.?)?\s*:?\s*(\d{4}-\d{6}-\d{2})\b", 0.85),
        ],
    ),
];

impl PatternRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            fields: IndexMap::new(),
            context_window: 60,
        }
    }

    /// The built-in registry.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (field, normalization, patterns) in BUILTIN {
            // Built-in patterns are fixed strings covered by tests.
            if let Ok(next) = registry.clone().register(field, *normalization, patterns) {
                registry = next;
            }
        }
        registry
    }

    /// Set the chars of context kept on each side of a match.
    pub fn with_context_window(mut self, chars: usize) -> Self {
        self.context_window = chars;
        self
    }

    /// Add patterns for a field, appending to any existing ones.
    pub fn register(
        mut self,
        field: &str,
        normalization: Normalization,
        patterns: &[(&str, f64)],
    ) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|(pattern, confidence)| {
                Regex::new(pattern)
                    .map(|regex| FieldPattern {
                        regex,
                        confidence: confidence.clamp(0.0, 1.0),
                    })
                    .map_err(|e| {
                        ExtractionError::Config(format!("bad pattern for {}: {}", field, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        self.fields
            .entry(field.to_string())
            .or_insert_with(|| FieldPatterns {
                normalization,
                patterns: Vec::new(),
            })
            .patterns
            .extend(compiled);
        Ok(self)
    }

    /// Fields this registry knows.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Best match per requested field.
    ///
    /// Highest confidence wins; ties go to the earliest position.
    pub fn extract(&self, text: &str, fields: &[String]) -> IndexMap<String, PatternMatch> {
        let mut found = IndexMap::new();
        for field in fields {
            let Some(entry) = self.fields.get(field) else {
                continue;
            };
            if let Some(best) = self.best_match(field, entry, text) {
                found.insert(field.clone(), best);
            }
        }
        found
    }

    /// Matches for schema fields at or above `floor`.
    pub fn prefill(
        &self,
        text: &str,
        schema: &FieldSchema,
        floor: f64,
    ) -> IndexMap<String, PatternMatch> {
        let mut matches = self.extract(text, &schema.field_names());
        matches.retain(|_, m| m.confidence >= floor);
        matches
    }

    /// [`prefill`](Self::prefill) over separate texts, so a quote never
    /// spans two of them. Highest confidence wins; ties go to the earlier
    /// text. Results follow schema order.
    pub fn prefill_each<'a>(
        &self,
        texts: impl IntoIterator<Item = &'a str>,
        schema: &FieldSchema,
        floor: f64,
    ) -> IndexMap<String, PatternMatch> {
        let mut best: IndexMap<String, PatternMatch> = IndexMap::new();
        for text in texts {
            for (field, candidate) in self.prefill(text, schema, floor) {
                let replace = best
                    .get(&field)
                    .map_or(true, |current| candidate.confidence > current.confidence);
                if replace {
                    best.insert(field, candidate);
                }
            }
        }

        schema
            .field_names()
            .into_iter()
            .filter_map(|field| best.shift_remove(&field).map(|m| (field, m)))
            .collect()
    }

    fn best_match(&self, field: &str, entry: &FieldPatterns, text: &str) -> Option<PatternMatch> {
        let mut best: Option<(f64, usize, usize, Value)> = None;

        for pattern in &entry.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let Some(value) = entry.normalization.apply(group.as_str()) else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some((conf, start, _, _)) => {
                        pattern.confidence > *conf
                            || (pattern.confidence == *conf && whole.start() < *start)
                    }
                };
                if better {
                    best = Some((pattern.confidence, whole.start(), whole.end(), value));
                }
            }
        }

        best.map(|(confidence, start, end, value)| PatternMatch {
            field: field.to_string(),
            value,
            quote: context(text, start, end, self.context_window),
            confidence,
            char_start: text[..start].chars().count(),
        })
    }
}

/// Verbatim text from `window` chars before `start` to `window` chars after `end`.
fn context(text: &str, start: usize, end: usize, window: usize) -> String {
    let from = match window {
        0 => start,
        w => text[..start]
            .char_indices()
            .rev()
            .nth(w - 1)
            .map_or(0, |(i, _)| i),
    };
    let to = text[end..]
        .char_indices()
        .nth(window)
        .map_or(text.len(), |(i, _)| end + i);
    text[from..to].trim().to_string()
}
