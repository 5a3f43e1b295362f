//! Prompts for each model-backed stage.
//!
//! Document text is always substituted last so placeholders that happen to
//! appear inside a paper are never expanded.

use indexmap::IndexMap;
use serde_json::Value;

use crate::types::document::DocumentUnit;
use crate::types::evidence::EvidenceItem;
use crate::types::schema::FieldSchema;

/// Prompt for classifying a batch of units as relevant or not.
pub const RELEVANCE_PROMPT: &str = r#"You are screening passages of a scientific paper for a literature review.

Review theme: {theme}

Target fields:
{fields}

For each numbered passage, decide whether it could contain a value for ANY
target field. Be inclusive: when unsure, mark it relevant.

Return one classification per passage with its index, a relevant flag, a
confidence between 0 and 1, and a reason of a few words.

Passages:
{units}"#;

/// Prompt for extracting field values.
pub const EXTRACT_PROMPT: &str = r#"Extract data for a literature review.

Review theme: {theme}

Fields to extract:
{fields}

Rules:
1. Use ONLY the document text below. Never guess.
2. If a field is not reported, return null.
3. Keep numbers as numbers and lists as lists.
{prefills_section}{revisions_section}
Document:
{context}"#;

/// Prompt for collecting one verbatim quote per extracted value.
pub const QUOTES_PROMPT: &str = r#"For each extracted value below, copy the exact sentence or phrase from
the document that supports it. Quotes must be VERBATIM: same words, same
numbers, same punctuation. Include the page number if the context shows one.

Extracted values:
{values}

Document:
{context}"#;

/// Prompt for the accuracy and consistency check.
pub const CHECK_PROMPT: &str = r#"Review an extraction made for a literature review.

Review theme: {theme}

Fields:
{fields}

Extracted values with their quotes:
{evidence}

Score two things between 0 and 1:
- accuracy_score: do the values match their quotes and the document?
- consistency_score: do the values fit the review theme and field definitions?

List every issue (field, issue_type, severity, detail, suggested_fix) and
give concrete suggestions the extractor can follow on its next attempt.

Document:
{context}"#;

/// Prompt for judging whether located quotes support their values.
pub const AUDIT_PROMPT: &str = r#"Audit the evidence below. Each quote has already been located in the
source document. For every item, judge whether the quote actually supports
the value for that field. Give an overall score between 0 and 1 and, per
field, is_correct, a severity (low, medium, high) and a short explanation.

Evidence:
{evidence}"#;

/// Format the relevance prompt for one batch.
pub fn format_relevance_prompt(
    theme: &str,
    schema: &FieldSchema,
    batch: &[(usize, &DocumentUnit)],
    max_unit_chars: usize,
) -> String {
    let units_text = batch
        .iter()
        .map(|(index, unit)| {
            let heading = unit
                .heading()
                .map(|h| format!(" ({})", h))
                .unwrap_or_default();
            format!(
                "[{}]{}\n{}",
                index,
                heading,
                truncate_chars(&unit.text, max_unit_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    RELEVANCE_PROMPT
        .replace("{theme}", theme)
        .replace("{fields}", &schema.describe())
        .replace("{units}", &units_text)
}

/// Format the extraction prompt.
///
/// Pre-fills are offered as known values; revision instructions from the
/// previous check are passed through verbatim.
pub fn format_extract_prompt(
    theme: &str,
    schema: &FieldSchema,
    prefills: &IndexMap<String, Value>,
    revisions: &[String],
    context: &str,
) -> String {
    let prefills_section = if prefills.is_empty() {
        String::new()
    } else {
        let lines = prefills
            .iter()
            .map(|(field, value)| format!("- {}: {}", field, value))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nAlready known (use these unless the document gives better evidence):\n{}\n",
            lines
        )
    };

    let revisions_section = if revisions.is_empty() {
        String::new()
    } else {
        let lines = revisions
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nA previous attempt was reviewed. Apply these corrections:\n{}\n",
            lines
        )
    };

    EXTRACT_PROMPT
        .replace("{theme}", theme)
        .replace("{fields}", &schema.describe())
        .replace("{prefills_section}", &prefills_section)
        .replace("{revisions_section}", &revisions_section)
        .replace("{context}", context)
}

/// Format the quotes prompt for the non-empty values.
pub fn format_quotes_prompt(values: &IndexMap<String, Value>, context: &str) -> String {
    let values_text = values
        .iter()
        .map(|(field, value)| format!("- {}: {}", field, value))
        .collect::<Vec<_>>()
        .join("\n");

    QUOTES_PROMPT
        .replace("{values}", &values_text)
        .replace("{context}", context)
}

/// Format the checker prompt.
pub fn format_check_prompt(
    theme: &str,
    schema: &FieldSchema,
    data: &IndexMap<String, Value>,
    evidence: &[EvidenceItem],
    context: &str,
) -> String {
    let evidence_text = data
        .iter()
        .map(|(field, value)| {
            let quote = evidence
                .iter()
                .find(|e| &e.field == field)
                .map(|e| e.quote.as_str())
                .filter(|q| !q.is_empty())
                .unwrap_or("(no quote)");
            format!("- {}: {}\n  quote: \"{}\"", field, value, quote)
        })
        .collect::<Vec<_>>()
        .join("\n");

    CHECK_PROMPT
        .replace("{theme}", theme)
        .replace("{fields}", &schema.describe())
        .replace("{evidence}", &evidence_text)
        .replace("{context}", context)
}

/// Format the audit prompt for located evidence.
pub fn format_audit_prompt(evidence: &[&EvidenceItem]) -> String {
    let evidence_text = evidence
        .iter()
        .map(|e| format!("- {}: {}\n  quote: \"{}\"", e.field, e.value, e.quote))
        .collect::<Vec<_>>()
        .join("\n");

    AUDIT_PROMPT.replace("{evidence}", &evidence_text)
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::FieldType;
    use serde_json::json;

    fn schema() -> FieldSchema {
        FieldSchema::new("trial").with_field("sample_size", FieldType::Integer, "Participants")
    }

    #[test]
    fn test_extract_prompt_includes_prefills_and_revisions() {
        let mut prefills = IndexMap::new();
        prefills.insert("sample_size".to_string(), json!(42));
        let prompt = format_extract_prompt(
            "falls prevention",
            &schema(),
            &prefills,
            &["Use the randomised count".to_string()],
            "Body text",
        );
        assert!(prompt.contains("- sample_size: 42"));
        assert!(prompt.contains("- Use the randomised count"));
        assert!(prompt.ends_with("Body text"));
    }

    #[test]
    fn test_context_placeholders_are_not_expanded() {
        let prompt = format_extract_prompt("t", &schema(), &IndexMap::new(), &[], "{theme}");
        assert!(prompt.ends_with("{theme}"));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("Zürich", 2), "Zü");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
