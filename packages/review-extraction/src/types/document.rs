//! Segmented document input, produced by an external parser.

use serde::{Deserialize, Serialize};

/// Kind of a segmented unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    #[default]
    Text,
    Table,
}

/// A chunk of a document: one paragraph, table or section body.
///
/// Immutable once produced by the parser. The filter, classifier and
/// extractor only ever read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUnit {
    /// Owning document id (usually the filename)
    pub doc_id: String,

    /// Unit body
    pub text: String,

    /// Section header, e.g. "Methods"
    #[serde(default)]
    pub section: Option<String>,

    /// Subsection header, e.g. "Participants"
    #[serde(default)]
    pub subsection: Option<String>,

    /// Text or table
    #[serde(default)]
    pub unit_type: UnitType,

    /// 1-based page number if known
    #[serde(default)]
    pub page: Option<u32>,
}

impl DocumentUnit {
    /// Create a text unit.
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            section: None,
            subsection: None,
            unit_type: UnitType::Text,
            page: None,
        }
    }

    /// Set the section header.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Set the subsection header.
    pub fn with_subsection(mut self, subsection: impl Into<String>) -> Self {
        self.subsection = Some(subsection.into());
        self
    }

    /// Set the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Mark this unit as a table.
    pub fn as_table(mut self) -> Self {
        self.unit_type = UnitType::Table;
        self
    }

    /// Section and subsection joined for display ("Methods / Participants").
    pub fn heading(&self) -> Option<String> {
        match (&self.section, &self.subsection) {
            (Some(s), Some(sub)) => Some(format!("{} / {}", s, sub)),
            (Some(s), None) => Some(s.clone()),
            (None, Some(sub)) => Some(sub.clone()),
            (None, None) => None,
        }
    }

    /// Metadata an external index needs to reference this unit.
    pub fn metadata(&self) -> UnitMetadata {
        UnitMetadata {
            section: self.section.clone(),
            subsection: self.subsection.clone(),
            unit_type: self.unit_type,
            page: self.page,
            char_len: self.text.chars().count(),
        }
    }
}

/// Per-unit metadata exposed for downstream indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub section: Option<String>,
    pub subsection: Option<String>,
    pub unit_type: UnitType,
    pub page: Option<u32>,
    pub char_len: usize,
}

/// A parsed document ready for extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Source filename, the checkpoint key
    pub filename: String,

    /// Full plain text, used for fingerprinting and quote auditing
    pub full_text: String,

    /// Ordered segmented units
    pub units: Vec<DocumentUnit>,
}

impl Document {
    /// Create a document from its units; `full_text` is the units joined.
    pub fn new(filename: impl Into<String>, units: Vec<DocumentUnit>) -> Self {
        let full_text = units
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            filename: filename.into(),
            full_text,
            units,
        }
    }

    /// Create a document with an explicit full text.
    pub fn with_full_text(
        filename: impl Into<String>,
        full_text: impl Into<String>,
        units: Vec<DocumentUnit>,
    ) -> Self {
        Self {
            filename: filename.into(),
            full_text: full_text.into(),
            units,
        }
    }

    /// Text used as the ground truth for quote auditing.
    ///
    /// Falls back to the joined units when the parser gave no full text.
    pub fn source_text(&self) -> String {
        if self.full_text.trim().is_empty() {
            self.units
                .iter()
                .map(|u| u.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            self.full_text.clone()
        }
    }

    /// True when there is nothing to extract from.
    pub fn is_blank(&self) -> bool {
        self.full_text.trim().is_empty() && self.units.iter().all(|u| u.text.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_joins_section_and_subsection() {
        let unit = DocumentUnit::new("a", "text")
            .with_section("Methods")
            .with_subsection("Participants");
        assert_eq!(unit.heading().as_deref(), Some("Methods / Participants"));
        assert_eq!(DocumentUnit::new("a", "text").heading(), None);
    }

    #[test]
    fn test_source_text_falls_back_to_units() {
        let doc = Document::with_full_text(
            "a.pdf",
            "  ",
            vec![DocumentUnit::new("a", "one"), DocumentUnit::new("a", "two")],
        );
        assert_eq!(doc.source_text(), "one\n\ntwo");
        assert!(!doc.is_blank());

        let blank = Document::with_full_text("b.pdf", "", vec![DocumentUnit::new("b", " ")]);
        assert!(blank.is_blank());
    }
}
