//! Target field schema for extraction.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pipeline::coerce::is_empty_value;

/// Value type of a target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Integer,
    Number,
    Year,
    Identifier,
    List,
    Boolean,
}

impl FieldType {
    /// JSON schema type for a nullable value of this field type.
    fn json_type(&self) -> Value {
        match self {
            Self::Text | Self::Identifier => json!(["string", "null"]),
            Self::Integer | Self::Year => json!(["integer", "null"]),
            Self::Number => json!(["number", "null"]),
            Self::Boolean => json!(["boolean", "null"]),
            Self::List => json!(["array", "null"]),
        }
    }
}

/// Description and type of one target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub description: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Ordered set of fields to extract from each document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Schema name, e.g. "clinical_trial"
    pub name: String,

    /// Field name → spec, in declaration order
    pub fields: IndexMap<String, FieldSpec>,
}

impl FieldSchema {
    /// Create an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add a field.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                description: description.into(),
                field_type,
                required: false,
            },
        );
        self
    }

    /// Add a field the review cannot do without.
    pub fn with_required_field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                description: description.into(),
                field_type,
                required: true,
            },
        );
        self
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared fields that are absent or empty in `data`.
    pub fn missing_fields(&self, data: &IndexMap<String, Value>) -> Vec<String> {
        self.fields
            .keys()
            .filter(|name| data.get(*name).map_or(true, is_empty_value))
            .cloned()
            .collect()
    }

    /// JSON schema for the field-values call. Every field is nullable.
    pub fn values_json_schema(&self, title: &str) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| {
                let mut prop = json!({
                    "type": spec.field_type.json_type(),
                    "description": spec.description,
                });
                if spec.field_type == FieldType::List {
                    prop["items"] = json!({ "type": "string" });
                }
                (name.clone(), prop)
            })
            .collect();

        json!({
            "title": title,
            "type": "object",
            "properties": properties,
            "required": self.field_names(),
            "additionalProperties": false,
        })
    }

    /// One line per field for prompts: `- name (type): description`.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|(name, spec)| {
                format!(
                    "- {} ({}){}: {}",
                    name,
                    serde_json::to_value(spec.field_type)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    if spec.required { ", required" } else { "" },
                    spec.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
