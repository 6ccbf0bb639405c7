//
// coding.rs
// seg2dcm
//
// Resolves free-text segment labels against the packaged anatomic-code table
// using a cascade of increasingly loose match passes.
//

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// DICOM PS3.16 chapter listing the available code meanings (Table L-1).
pub const CODING_REFERENCE_URL: &str =
    "http://dicom.nema.org/medical/dicom/current/output/chtml/part16/chapter_L.html#chapter_L";

/// Code value emitted for labels with no hit anywhere in the table.
const PLACEHOLDER_CODE_VALUE: &str = "0.0.0.0.0.0.00000.0.000.0.00";

static BUNDLED_TABLE: &str = include_str!("../resources/code_lookup_table.json");

/// One row of the packaged code table.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeEntry {
    #[serde(rename = "Coding Scheme Designator")]
    pub designator: String,
    #[serde(rename = "Code Value")]
    pub code_value: String,
    #[serde(rename = "Code Meaning")]
    pub code_meaning: String,
    #[serde(rename = "Body Part Examined")]
    pub body_part_examined: String,
    #[serde(rename = "SNOMED-RT ID (Retired)")]
    pub snomed_rt_id: String,
    #[serde(rename = "FMA Code Value")]
    pub fma_code: Option<String>,
    #[serde(rename = "UMLS Concept UniqueID")]
    pub umls_concept_id: String,
}

/// The lookup table, loaded once and never mutated.
#[derive(Debug)]
pub struct CodeTable {
    entries: Vec<CodeEntry>,
}

/// Predicate over (normalized label, lower-cased code meaning, lower-cased
/// body part).
type MatchPredicate = fn(&str, &str, &str) -> bool;

/// Ordered match passes. Each pass rescans the table from the top; the first
/// entry hit by the earliest pass wins. No scoring.
const PASSES: &[(&str, MatchPredicate)] = &[
    ("exact", exact_match),
    ("substring", substring_match),
    ("word-exact", word_exact_match),
    ("word-substring", word_substring_match),
];

fn exact_match(label: &str, meaning: &str, body_part: &str) -> bool {
    label.replace(' ', "-") == meaning.replace(' ', "-") || label == body_part
}

fn substring_match(label: &str, meaning: &str, body_part: &str) -> bool {
    !label.is_empty() && (meaning.contains(label) || body_part.contains(label))
}

fn word_exact_match(label: &str, meaning: &str, body_part: &str) -> bool {
    label.split(' ').any(|word| word == meaning || word == body_part)
}

fn word_substring_match(label: &str, meaning: &str, body_part: &str) -> bool {
    // NOTE: a one-letter word still matches here, so labels like "lobe of
    // liver" can hit unrelated rows through common short words. Kept: looser
    // is better than unmapped for display purposes, and the log line names
    // the pass that matched.
    label
        .split(' ')
        .filter(|word| !word.is_empty())
        .any(|word| meaning.contains(word) || body_part.contains(word))
}

/// Lower-case and collapse internal whitespace to single spaces.
fn normalize(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl CodeTable {
    /// Load the table compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_TABLE)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<CodeEntry> = serde_json::from_str(raw).with_context(|| {
            format!(
                "Malformed code lookup table entry; check available code names in Table L-1 at {}",
                CODING_REFERENCE_URL
            )
        })?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a free-text label to a code entry.
    ///
    /// Never fails: a label with no hit in any pass comes back as a synthetic
    /// "Custom" entry carrying the normalized label as its code meaning.
    pub fn resolve(&self, label: &str) -> CodeEntry {
        let needle = normalize(label);
        for &(pass, predicate) in PASSES {
            for entry in &self.entries {
                let meaning = entry.code_meaning.to_lowercase();
                let body_part = entry.body_part_examined.to_lowercase();
                if predicate(&needle, &meaning, &body_part) {
                    info!(
                        pass,
                        label = %needle,
                        code_meaning = %entry.code_meaning,
                        "resolved coding scheme"
                    );
                    return entry.clone();
                }
            }
        }

        info!(label = %needle, "no coding-scheme hit, using custom entry");
        CodeEntry {
            designator: "Custom".to_string(),
            code_value: PLACEHOLDER_CODE_VALUE.to_string(),
            code_meaning: needle,
            body_part_examined: String::new(),
            snomed_rt_id: String::new(),
            fma_code: None,
            umls_concept_id: String::new(),
        }
    }
}
