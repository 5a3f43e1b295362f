//! Content filter: drop units that cannot hold extractable data.
//!
//! Pure and deterministic. Removal order is: excluded section, reference
//! list, boilerplate, exact duplicate, near duplicate. A unit is counted
//! under the first reason that applies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::fuzzy::ratio;
use crate::types::config::FilterConfig;
use crate::types::document::{DocumentUnit, UnitType};
use crate::types::result::FilterStats;

/// Section headers whose content is never extracted from.
const EXCLUDED_SECTIONS: &[&str] = &[
    "references",
    "reference list",
    "bibliography",
    "literature cited",
    "works cited",
    "acknowledgement",
    "acknowledgment",
    "affiliation",
    "funding",
    "financial support",
    "conflict of interest",
    "conflicts of interest",
    "competing interest",
    "declaration of interest",
    "disclosure",
    "author contribution",
    "authors' contribution",
    "supplementary",
    "supplemental material",
    "abbreviations",
    "data availability",
    "availability of data",
    "correspondence",
];

static CITATION_LINE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // [12] Smith J, ...
        r"^\s*\[\d+\]",
        // 12. Smith J, Jones K.
        r"^\s*\d{1,3}\.\s+[A-Z][A-Za-z'\-]+\s+[A-Z]{1,3}[,.]",
        r"\bet al\.",
        r"(?i)\bdoi:?\s*10\.\d{4,}",
        r"(?i)https?://(dx\.)?doi\.org/",
        r"\(\d{4}\)[.;,]",
        // 12(3):45-67
        r";?\s*\d+\s*\(\d+\)\s*:\s*\d+",
        r"(?i)\bPMID:?\s*\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid citation regex"))
    .collect()
});

static BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(©|\(c\)\s*\d{4}|copyright|all rights reserved|creative commons|licen[cs]ed under|downloaded from|this article is protected|reprints and permissions)",
    )
    .expect("valid boilerplate regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Kept units plus what was removed.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub units: Vec<DocumentUnit>,
    pub stats: FilterStats,
}

/// Rule-based unit filter.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    config: FilterConfig,
}

impl ContentFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Filter units, preserving the order of the ones kept.
    pub fn filter(&self, units: &[DocumentUnit]) -> FilterOutcome {
        let original_chars: usize = units.iter().map(|u| u.text.chars().count()).sum();
        let mut stats = FilterStats {
            original_units: units.len(),
            original_chars,
            ..Default::default()
        };

        if !self.config.enabled {
            stats.kept_units = units.len();
            stats.kept_chars = original_chars;
            return FilterOutcome {
                units: units.to_vec(),
                stats,
            };
        }

        let mut kept: Vec<DocumentUnit> = Vec::with_capacity(units.len());
        let mut kept_normalized: Vec<String> = Vec::with_capacity(units.len());
        let mut seen_hashes: HashSet<String> = HashSet::new();

        for unit in units {
            if is_excluded_section(unit) {
                stats.removed_by_section += 1;
                continue;
            }
            if unit.unit_type == UnitType::Text && self.looks_like_references(&unit.text) {
                stats.removed_as_references += 1;
                continue;
            }
            if unit.text.trim().is_empty() || self.is_boilerplate(&unit.text) {
                stats.removed_as_boilerplate += 1;
                continue;
            }

            let normalized = normalize(&unit.text);
            if !seen_hashes.insert(hash(&normalized)) {
                stats.removed_exact_duplicates += 1;
                continue;
            }
            if self.is_near_duplicate(&normalized, &kept_normalized) {
                stats.removed_near_duplicates += 1;
                continue;
            }

            kept_normalized.push(normalized);
            kept.push(unit.clone());
        }

        stats.kept_units = kept.len();
        stats.kept_chars = kept.iter().map(|u| u.text.chars().count()).sum();
        stats.chars_saved = stats.original_chars.saturating_sub(stats.kept_chars);
        stats.estimated_tokens_saved = stats.chars_saved / 4;

        debug!(
            original = stats.original_units,
            kept = stats.kept_units,
            chars_saved = stats.chars_saved,
            "Content filter applied"
        );

        FilterOutcome { units: kept, stats }
    }

    /// Reference-list heuristic over the leading non-empty lines.
    pub fn looks_like_references(&self, text: &str) -> bool {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(self.config.reference_probe_lines)
            .collect();
        if lines.len() < 3 {
            return false;
        }

        let citation_like = lines
            .iter()
            .filter(|line| CITATION_LINE.iter().any(|re| re.is_match(line)))
            .count();
        citation_like as f64 / lines.len() as f64 >= self.config.reference_density
    }

    fn is_boilerplate(&self, text: &str) -> bool {
        text.chars().count() < self.config.boilerplate_max_chars && BOILERPLATE.is_match(text)
    }

    fn is_near_duplicate(&self, normalized: &str, kept: &[String]) -> bool {
        let threshold = self.config.similarity_threshold;
        let len = normalized.chars().count();
        kept.iter().any(|other| {
            let other_len = other.chars().count();
            // ratio can never exceed 2·min/(a+b)
            let ceiling = 2.0 * len.min(other_len) as f64 / (len + other_len).max(1) as f64;
            ceiling >= threshold && ratio(normalized, other) >= threshold
        })
    }
}

fn is_excluded_section(unit: &DocumentUnit) -> bool {
    [&unit.section, &unit.subsection]
        .into_iter()
        .flatten()
        .any(|header| {
            let header = header
                .trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
                .to_lowercase();
            EXCLUDED_SECTIONS.iter().any(|term| header.starts_with(term))
        })
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_lowercase()
}

fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(text: &str) -> DocumentUnit {
        DocumentUnit::new("doc", text)
    }

    #[test]
    fn test_removes_excluded_sections() {
        let units = vec![
            unit("We enrolled 42 adults.").with_section("Methods"),
            unit("Smith J. A paper.").with_section("References"),
            unit("Funded by a grant.").with_section("4. Funding"),
            unit("We thank the nurses.").with_subsection("Acknowledgements"),
        ];
        let outcome = ContentFilter::default().filter(&units);
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.stats.removed_by_section, 3);
    }

    #[test]
    fn test_removes_reference_lists_without_header() {
        let refs = "[1] Smith J, Jones K. Exercise in older adults. Lancet. 2019;12(3):45-67.\n\
                    [2] Brown A, et al. Balance training. BMJ (2018).\n\
                    [3] Lee C. Falls. doi: 10.1000/xyz123\n\
                    [4] Chan D. PMID: 1234567";
        let units = vec![unit(refs), unit("Participants were 65 years or older.")];
        let outcome = ContentFilter::default().filter(&units);
        assert_eq!(outcome.stats.removed_as_references, 1);
        assert_eq!(outcome.units.len(), 1);
    }

    #[test]
    fn test_prose_is_not_mistaken_for_references() {
        let prose = "Participants were recruited from three clinics.\n\
                     Inclusion required age over 65.\n\
                     Exclusion criteria were dementia and recent surgery.";
        assert!(!ContentFilter::default().looks_like_references(prose));
    }

    #[test]
    fn test_removes_short_boilerplate() {
        let units = vec![
            unit("© 2020 The Authors. All rights reserved."),
            unit("Downloaded from example.org on 1 May 2021"),
            unit("Mean age was 71 years."),
        ];
        let outcome = ContentFilter::default().filter(&units);
        assert_eq!(outcome.stats.removed_as_boilerplate, 2);
        assert_eq!(outcome.units[0].text, "Mean age was 71 years.");
    }

    #[test]
    fn test_dedups_exact_and_near_duplicates() {
        let text = "The intervention group received twelve weeks of supervised balance training.";
        let near = "The intervention group received twelve weeks of supervised balance training";
        let units = vec![
            unit(text),
            unit(&format!("  {}  ", text.to_uppercase())),
            unit(near),
            unit("Outcomes were assessed at baseline and follow-up."),
        ];
        let outcome = ContentFilter::default().filter(&units);
        assert_eq!(outcome.stats.removed_exact_duplicates, 1);
        assert_eq!(outcome.stats.removed_near_duplicates, 1);
        assert_eq!(outcome.units.len(), 2);
    }

    #[test]
    fn test_stats_account_for_saved_chars() {
        let units = vec![
            unit("Kept text here."),
            unit("Thanks to all.").with_section("Acknowledgments"),
        ];
        let outcome = ContentFilter::default().filter(&units);
        let s = &outcome.stats;
        assert_eq!(s.original_chars, 15 + 14);
        assert_eq!(s.kept_chars, 15);
        assert_eq!(s.chars_saved, 14);
        assert_eq!(s.estimated_tokens_saved, 3);
        assert_eq!(s.removed_units(), 1);
    }

    #[test]
    fn test_disabled_filter_passes_everything() {
        let config = FilterConfig {
            enabled: false,
            ..Default::default()
        };
        let units = vec![unit("x").with_section("References")];
        let outcome = ContentFilter::new(config).filter(&units);
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.stats.kept_units, 1);
    }
}
