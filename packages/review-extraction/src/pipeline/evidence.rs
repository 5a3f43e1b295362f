//! Evidence extraction: field values, then one verbatim quote per value.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::coerce::{coerce_field, is_empty_value, unwrap_envelope};
use super::gateway::ModelGateway;
use super::patterns::PatternMatch;
use super::prompts::{format_extract_prompt, format_quotes_prompt};
use super::responses::{QuoteResponse, ResponseSchema};
use crate::error::{LlmError, Result};
use crate::traits::llm::Stage;
use crate::types::evidence::EvidenceItem;
use crate::types::schema::FieldSchema;

/// Schema title of the field-values call.
pub const FIELD_VALUES_TITLE: &str = "FieldValues";

/// Inputs for one extraction attempt.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub schema: &'a FieldSchema,
    pub theme: &'a str,
    pub context: &'a str,
    pub prefills: &'a IndexMap<String, PatternMatch>,

    /// Suggestions from the previous check, passed through verbatim
    pub revisions: &'a [String],
}

/// Values and evidence from one attempt.
#[derive(Debug, Clone, Default)]
pub struct ExtractionAttempt {
    /// Every schema field, in schema order; missing values are null
    pub data: IndexMap<String, Value>,

    /// One item per non-empty value
    pub evidence: Vec<EvidenceItem>,

    /// Fields whose value came from a pattern pre-fill
    pub pattern_fields: Vec<String>,
}

/// Two-call evidence extractor.
#[derive(Debug, Clone)]
pub struct EvidenceExtractor {
    gateway: ModelGateway,
}

impl EvidenceExtractor {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// Extract values, merge pre-fills, then collect quotes.
    ///
    /// Either model call failing fails the attempt.
    pub async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<ExtractionAttempt> {
        let prefill_values: IndexMap<String, Value> = request
            .prefills
            .iter()
            .map(|(field, m)| (field.clone(), m.value.clone()))
            .collect();

        let prompt = format_extract_prompt(
            request.theme,
            request.schema,
            &prefill_values,
            request.revisions,
            request.context,
        );
        let raw = self
            .gateway
            .call(
                Stage::Extraction,
                prompt,
                request.schema.values_json_schema(FIELD_VALUES_TITLE),
            )
            .await?;

        let raw = unwrap_envelope(raw);
        let Value::Object(raw) = raw else {
            return Err(LlmError::InvalidResponse(format!(
                "expected an object of field values, got {}",
                type_name(&raw)
            ))
            .into());
        };

        let mut data: IndexMap<String, Value> = request
            .schema
            .fields
            .iter()
            .map(|(name, spec)| {
                let value = raw
                    .get(name)
                    .map_or(Value::Null, |v| coerce_field(v, spec.field_type));
                (name.clone(), value)
            })
            .collect();

        let mut pattern_fields = Vec::new();
        for (field, m) in request.prefills {
            if let Some(slot) = data.get_mut(field) {
                if is_empty_value(slot) {
                    *slot = m.value.clone();
                    pattern_fields.push(field.clone());
                }
            }
        }

        let model_values: IndexMap<String, Value> = data
            .iter()
            .filter(|(field, value)| !is_empty_value(value) && !pattern_fields.contains(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();

        let quotes = if model_values.is_empty() {
            QuoteResponse::default()
        } else {
            let prompt = format_quotes_prompt(&model_values, request.context);
            let value = self
                .gateway
                .call(Stage::Quotes, prompt, QuoteResponse::response_schema())
                .await?;
            QuoteResponse::from_value(&value)
        };

        let evidence = data
            .iter()
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(field, value)| {
                if pattern_fields.contains(field) {
                    let m = &request.prefills[field];
                    return EvidenceItem::new(field.clone(), value.clone(), m.quote.clone())
                        .with_confidence(m.confidence)
                        .from_pattern();
                }
                match quotes.quote_for(field) {
                    Some(q) => {
                        let item = EvidenceItem::new(field.clone(), value.clone(), q.quote.clone())
                            .with_confidence(q.confidence);
                        match q.page {
                            Some(page) => item.with_page(page),
                            None => item,
                        }
                    }
                    None => EvidenceItem::new(field.clone(), value.clone(), ""),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            values = model_values.len(),
            prefilled = pattern_fields.len(),
            quoted = evidence.iter().filter(|e| e.has_quote()).count(),
            "Extraction attempt complete"
        );

        Ok(ExtractionAttempt {
            data,
            evidence,
            pattern_fields,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::pipeline::patterns::PatternRegistry;
    use crate::testing::{sample_schema, MockLlm};
    use serde_json::json;
    use std::sync::Arc;

    const CONTEXT: &str = "We enrolled N=42 adults in Oslo, Norway.";

    async fn run(llm: MockLlm, prefills: IndexMap<String, PatternMatch>) -> Result<ExtractionAttempt> {
        let schema = sample_schema();
        let extractor = EvidenceExtractor::new(ModelGateway::new(Arc::new(llm)));
        extractor
            .extract(&ExtractionRequest {
                schema: &schema,
                theme: "falls prevention",
                context: CONTEXT,
                prefills: &prefills,
                revisions: &[],
            })
            .await
    }

    #[tokio::test]
    async fn test_values_are_coerced_and_quoted() {
        let llm = MockLlm::new()
            .with_values(json!({"data": {"sample_size": "42 adults", "country": " Norway ", "intervention": null}}))
            .with_quotes(json!({"quotes": [
                {"field": "sample_size", "quote": "N=42 adults", "page": 2, "confidence": 0.9},
                {"field": "country", "quote": "Oslo, Norway", "page": null, "confidence": 0.8}
            ]}));
        let attempt = run(llm.clone(), IndexMap::new()).await.unwrap();

        assert_eq!(attempt.data["sample_size"], json!(42));
        assert_eq!(attempt.data["country"], json!("Norway"));
        assert_eq!(attempt.data["intervention"], Value::Null);
        assert_eq!(attempt.evidence.len(), 2);
        assert_eq!(attempt.evidence[0].page, Some(2));
        assert_eq!(llm.call_count(Stage::Quotes), 1);
    }

    #[tokio::test]
    async fn test_prefill_fills_empty_model_value() {
        let prefills = PatternRegistry::builtin().prefill(CONTEXT, &sample_schema(), 0.8);
        let llm = MockLlm::new().with_values(json!({}));
        let attempt = run(llm.clone(), prefills).await.unwrap();

        assert_eq!(attempt.data["sample_size"], json!(42));
        assert_eq!(attempt.pattern_fields, vec!["sample_size".to_string()]);
        let item = &attempt.evidence[0];
        assert!(CONTEXT.contains(&item.quote));
        assert_eq!(item.confidence, 0.9);
        // Nothing came from the model, so no quotes call.
        assert_eq!(llm.call_count(Stage::Quotes), 0);
    }

    #[tokio::test]
    async fn test_model_value_overrides_prefill() {
        let prefills = PatternRegistry::builtin().prefill(CONTEXT, &sample_schema(), 0.8);
        let llm = MockLlm::new().with_values(json!({"sample_size": 40}));
        let attempt = run(llm, prefills).await.unwrap();

        assert_eq!(attempt.data["sample_size"], json!(40));
        assert!(attempt.pattern_fields.is_empty());
    }

    #[tokio::test]
    async fn test_non_object_response_is_invalid() {
        let llm = MockLlm::new().with_values(json!("forty-two"));
        let err = run(llm, IndexMap::new()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Llm(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_quote_failure_fails_attempt() {
        let llm = MockLlm::new()
            .with_values(json!({"country": "Norway"}))
            .with_failure("QuoteResponse", LlmError::Provider("boom".into()));
        assert!(run(llm, IndexMap::new()).await.is_err());
    }
}
