//! Regex pattern tables for the learning loop
//!
//! The entity extractor, error classifier, and temporal detector are all
//! table-driven: the tables live in `patterns.toml` (compiled in as the
//! default, overridable from a file at startup) so the behavior can evolve
//! without code changes.
//!
//! Also home to the query fingerprint shared by the feedback store, the
//! review queue, and the audit pipeline: all-caps identifiers and digit
//! runs are replaced with placeholders *before* lowercasing, whitespace is
//! collapsed, the result is truncated to 200 characters and hashed to a
//! stable 16-hex-char id.

use once_cell::sync::Lazy;
use regex::Regex;
use sentra_core::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Classified error type for an audited incorrect response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// A factually wrong technical detail
    TechnicalInaccuracy,
    /// The response did not address the query
    IrrelevantResponse,
    /// The response contradicts known facts or itself
    ContradictoryInfo,
    /// The recommended fix or tool was wrong
    WrongRecommendation,
    /// The response invented entities or behavior
    Hallucination,
    /// The response relies on outdated information
    DeprecatedInfo,
    /// The surrounding context was misleading
    MisleadingContext,
    /// A frequently recurring mistake
    CommonError,
}

impl ErrorType {
    /// Stable snake_case name, as used in the pattern table
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::TechnicalInaccuracy => "technical_inaccuracy",
            ErrorType::IrrelevantResponse => "irrelevant_response",
            ErrorType::ContradictoryInfo => "contradictory_info",
            ErrorType::WrongRecommendation => "wrong_recommendation",
            ErrorType::Hallucination => "hallucination",
            ErrorType::DeprecatedInfo => "deprecated_info",
            ErrorType::MisleadingContext => "misleading_context",
            ErrorType::CommonError => "common_error",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "technical_inaccuracy" => ErrorType::TechnicalInaccuracy,
            "irrelevant_response" => ErrorType::IrrelevantResponse,
            "contradictory_info" => ErrorType::ContradictoryInfo,
            "wrong_recommendation" => ErrorType::WrongRecommendation,
            "hallucination" => ErrorType::Hallucination,
            "deprecated_info" => ErrorType::DeprecatedInfo,
            "misleading_context" => ErrorType::MisleadingContext,
            "common_error" => ErrorType::CommonError,
            _ => return None,
        })
    }
}

#[derive(Deserialize)]
struct RawTable {
    entities: BTreeMap<String, Vec<String>>,
    error_types: Vec<RawErrorType>,
    temporal: Vec<RawTemporal>,
}

#[derive(Deserialize)]
struct RawErrorType {
    name: String,
    pattern: String,
}

#[derive(Deserialize)]
struct RawTemporal {
    pattern: String,
    context: String,
}

/// Compiled pattern tables
pub struct PatternTable {
    entities: Vec<(String, Vec<Regex>)>,
    error_types: Vec<(ErrorType, Regex)>,
    temporal: Vec<(Regex, String)>,
}

static DEFAULT_TABLE: Lazy<PatternTable> = Lazy::new(|| {
    PatternTable::from_toml_str(include_str!("patterns.toml"))
        .expect("compiled-in pattern table is valid")
});

impl PatternTable {
    /// The compiled-in default table
    pub fn default_table() -> &'static PatternTable {
        &DEFAULT_TABLE
    }

    /// Parse and compile a table from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawTable = toml::from_str(text)
            .map_err(|e| Error::Validation(format!("bad pattern table: {e}")))?;

        let mut entities = Vec::new();
        for (kind, patterns) in raw.entities {
            let compiled: Vec<Regex> = patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        Error::Validation(format!("bad entity pattern for {kind}: {e}"))
                    })
                })
                .collect::<Result<_>>()?;
            entities.push((kind, compiled));
        }

        let mut error_types = Vec::new();
        for raw_type in raw.error_types {
            let error_type = ErrorType::from_name(&raw_type.name).ok_or_else(|| {
                Error::Validation(format!("unknown error type: {}", raw_type.name))
            })?;
            let regex = Regex::new(&raw_type.pattern).map_err(|e| {
                Error::Validation(format!("bad error pattern for {}: {e}", raw_type.name))
            })?;
            error_types.push((error_type, regex));
        }

        let mut temporal = Vec::new();
        for raw_temporal in raw.temporal {
            let regex = Regex::new(&raw_temporal.pattern)
                .map_err(|e| Error::Validation(format!("bad temporal pattern: {e}")))?;
            temporal.push((regex, raw_temporal.context));
        }

        Ok(PatternTable {
            entities,
            error_types,
            temporal,
        })
    }

    /// Extract entities from text, grouped by kind
    ///
    /// Matches are deduplicated and normalized: uppercased, except command
    /// names which are CLI tools and stay lowercase.
    pub fn extract_entities(&self, text: &str) -> BTreeMap<String, Vec<String>> {
        let mut found: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (kind, patterns) in &self.entities {
            let mut seen = Vec::new();
            for pattern in patterns {
                for captures in pattern.captures_iter(text) {
                    let matched = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    if matched.is_empty() {
                        continue;
                    }
                    let normalized = if kind == "command" {
                        matched.to_lowercase()
                    } else {
                        matched.to_uppercase()
                    };
                    if !seen.contains(&normalized) {
                        seen.push(normalized);
                    }
                }
            }
            if !seen.is_empty() {
                found.insert(kind.clone(), seen);
            }
        }
        found
    }

    /// Total entity count across kinds
    pub fn count_entities(entities: &BTreeMap<String, Vec<String>>) -> usize {
        entities.values().map(Vec::len).sum()
    }

    /// Classify an audit reason into an error type; first match wins
    pub fn classify_error(&self, reason: &str) -> ErrorType {
        for (error_type, regex) in &self.error_types {
            if regex.is_match(reason) {
                return *error_type;
            }
        }
        ErrorType::TechnicalInaccuracy
    }

    /// Temporal context phrase if the query contains a time word
    pub fn temporal_context(&self, query: &str) -> Option<&str> {
        self.temporal
            .iter()
            .find(|(regex, _)| regex.is_match(query))
            .map(|(_, context)| context.as_str())
    }
}

static ALL_CAPS_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Z0-9_]{2,}\b").expect("static regex"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("static regex"));

/// Normalize a query to its structural pattern
///
/// All-caps identifiers become `<entity>` and digit runs become `<num>`
/// before lowercasing, so entity shape survives normalization; whitespace
/// collapses and the result is truncated to 200 characters.
pub fn normalize_query(query: &str) -> String {
    let replaced = ALL_CAPS_IDENT.replace_all(query, "<entity>");
    let replaced = DIGIT_RUN.replace_all(&replaced, "<num>");
    let lowered = replaced.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(200).collect()
}

/// Stable 16-hex-char fingerprint of a query's structural pattern
pub fn query_fingerprint(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_compiles() {
        let table = PatternTable::default_table();
        assert!(!table.entities.is_empty());
        assert!(!table.error_types.is_empty());
    }

    #[test]
    fn test_extract_job_and_error_code() {
        let table = PatternTable::default_table();
        let entities =
            table.extract_entities("why did job BATCH_A fail with error code AWSBIS529?");
        assert_eq!(entities["job"], vec!["BATCH_A"]);
        assert_eq!(entities["error_code"], vec!["AWSBIS529"]);
    }

    #[test]
    fn test_extract_command_stays_lowercase() {
        let table = PatternTable::default_table();
        let entities = table.extract_entities("try running CONMAN to check the status");
        assert_eq!(entities["command"], vec!["conman"]);
    }

    #[test]
    fn test_extract_workstation() {
        let table = PatternTable::default_table();
        let entities = table.extract_entities("the job runs on CPU001 every night");
        assert_eq!(entities["workstation"], vec!["CPU001"]);
    }

    #[test]
    fn test_extract_dedupes() {
        let table = PatternTable::default_table();
        let entities = table.extract_entities("job BATCH_A failed; resubmit BATCH_A job");
        assert_eq!(entities["job"], vec!["BATCH_A"]);
    }

    #[test]
    fn test_no_entities_in_plain_text() {
        let table = PatternTable::default_table();
        let entities = table.extract_entities("how does scheduling work in general?");
        assert_eq!(PatternTable::count_entities(&entities), 0);
    }

    #[test]
    fn test_classify_wrong_recommendation() {
        let table = PatternTable::default_table();
        assert_eq!(
            table.classify_error("wrong recommendation for error code AWSBIS529"),
            ErrorType::WrongRecommendation
        );
    }

    #[test]
    fn test_classify_fallback_is_technical() {
        let table = PatternTable::default_table();
        assert_eq!(
            table.classify_error("response was bad somehow"),
            ErrorType::TechnicalInaccuracy
        );
    }

    #[test]
    fn test_classify_variants() {
        let table = PatternTable::default_table();
        assert_eq!(
            table.classify_error("this is deprecated since 9.5"),
            ErrorType::DeprecatedInfo
        );
        assert_eq!(
            table.classify_error("the answer is irrelevant to the question"),
            ErrorType::IrrelevantResponse
        );
        assert_eq!(
            table.classify_error("hallucinated a job that does not exist"),
            ErrorType::Hallucination
        );
        assert_eq!(
            table.classify_error("confused CPU001 with CPU002"),
            ErrorType::ContradictoryInfo
        );
    }

    #[test]
    fn test_temporal_context() {
        let table = PatternTable::default_table();
        assert!(table
            .temporal_context("what failed overnight?")
            .unwrap()
            .contains("overnight"));
        assert!(table.temporal_context("list failing jobs").is_none());
    }

    #[test]
    fn test_normalize_protects_identifiers_before_lowercasing() {
        let normalized = normalize_query("why did job BATCH_A fail at 0300?");
        assert_eq!(normalized, "why did job <entity> fail at <num>?");
    }

    #[test]
    fn test_fingerprint_stable_across_identifier_values() {
        // Same structure, different identifiers and numbers
        let a = query_fingerprint("why did job BATCH_A fail at 0300?");
        let b = query_fingerprint("why did job PAYROLL_X fail at 1200?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fingerprint_differs_across_structure() {
        let a = query_fingerprint("why did job BATCH_A fail?");
        let b = query_fingerprint("how do I restart job BATCH_A?");
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_truncates_to_200_chars() {
        let long = "word ".repeat(100);
        assert!(normalize_query(&long).chars().count() <= 200);
    }

    #[test]
    fn test_bad_table_rejected() {
        assert!(PatternTable::from_toml_str("entities = 3").is_err());
        let bad_regex = r#"
            [entities]
            job = ['(unclosed']
            [[error_types]]
            name = "common_error"
            pattern = 'x'
            [[temporal]]
            pattern = 'y'
            context = "z"
        "#;
        assert!(PatternTable::from_toml_str(bad_regex).is_err());
    }
}
