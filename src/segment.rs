use serde::Serialize;
use tracing::debug;

use crate::coding::CodeTable;

/// CodeValue/CodingSchemeDesignator/CodeMeaning triple as the encoder schema
/// spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeSequence {
    #[serde(rename = "CodeValue")]
    pub code_value: String,
    #[serde(rename = "CodingSchemeDesignator")]
    pub designator: String,
    #[serde(rename = "CodeMeaning")]
    pub code_meaning: String,
}

/// One segment's descriptor inside a `segmentAttributes` group.
///
/// The three code sequences always carry the same triple, derived from the
/// one resolved table entry for the segment's label.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentAttribute {
    #[serde(rename = "labelID")]
    pub label_id: u32,
    #[serde(rename = "SegmentAlgorithmType")]
    pub algorithm_type: String,
    #[serde(rename = "SegmentAlgorithmName")]
    pub algorithm_name: String,
    #[serde(rename = "recommendedDisplayRGBValue")]
    pub display_color: [u8; 3],
    #[serde(rename = "SegmentLabel")]
    pub label: String,
    #[serde(rename = "SegmentedPropertyCategoryCodeSequence")]
    pub category: CodeSequence,
    #[serde(rename = "SegmentedPropertyTypeCodeSequence")]
    pub property_type: CodeSequence,
    #[serde(rename = "SegmentedPropertyTypeModifierCodeSequence")]
    pub type_modifier: CodeSequence,
}

/// The coding lookup key of a compound label like "right@kidney" is the text
/// after the last '@'; the qualifier stays only in the emitted CodeMeaning.
fn search_key(code_meaning: &str) -> String {
    code_meaning
        .rsplit('@')
        .next()
        .unwrap_or(code_meaning)
        .to_lowercase()
}

pub fn build(
    table: &CodeTable,
    algorithm_type: &str,
    algorithm_name: &str,
    code_meaning: &str,
    color: [u8; 3],
    label_name: &str,
    label_id: u32,
) -> SegmentAttribute {
    let key = search_key(code_meaning);
    debug!(code_meaning, search_key = %key, "searching coding scheme");
    let entry = table.resolve(&key);

    let triple = CodeSequence {
        code_value: entry.code_value,
        designator: entry.designator,
        code_meaning: code_meaning.to_string(),
    };

    SegmentAttribute {
        label_id,
        algorithm_type: algorithm_type.to_string(),
        algorithm_name: algorithm_name.to_string(),
        display_color: color,
        label: label_name.to_string(),
        category: triple.clone(),
        property_type: triple.clone(),
        type_modifier: triple,
    }
}

/// Lower-case the configured segment info; the series description falls back
/// to that code meaning when none is configured.
pub fn seg_info_to_meaning(seg_info: &str, series_description: &str) -> (String, String) {
    let code_meaning = seg_info.to_lowercase();
    let description = if series_description.is_empty() {
        code_meaning.clone()
    } else {
        series_description.to_string()
    };
    (code_meaning, description)
}
