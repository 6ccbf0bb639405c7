//
// metadata.rs
// seg2dcm
//
// Assembles the segmentation-information document consumed by the external
// encoder and writes it with a stable key order.
//

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Serializer, Value};
use tracing::info;

use crate::props::PropMap;

/// Schema the encoder validates the document against.
pub const SEG_SCHEMA: &str =
    "https://raw.githubusercontent.com/qiicr/dcmqi/master/doc/schemas/seg-schema.json#";

/// The document handed to the external encoder, one per segmentation case.
///
/// `segment_attributes` is a list of groups: a multi-segment object carries
/// one group with all segments, the combined single-label flow one group per
/// source mask.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationInformation {
    #[serde(rename = "@schema")]
    pub schema: String,
    #[serde(rename = "ContentCreatorName")]
    pub content_creator_name: String,
    #[serde(rename = "SeriesNumber")]
    pub series_number: String,
    #[serde(rename = "InstanceNumber")]
    pub instance_number: String,
    #[serde(rename = "SeriesDescription")]
    pub series_description: String,
    #[serde(flatten)]
    pub extra: PropMap,
    #[serde(rename = "segmentAttributes")]
    pub segment_attributes: Vec<Vec<Value>>,
}

impl SegmentationInformation {
    pub fn new(
        content_creator_name: &str,
        series_number: u32,
        instance_number: u32,
        extra: PropMap,
    ) -> Self {
        Self {
            schema: SEG_SCHEMA.to_string(),
            content_creator_name: content_creator_name.to_string(),
            series_number: series_number.to_string(),
            instance_number: instance_number.to_string(),
            series_description: String::new(),
            extra,
            segment_attributes: Vec::new(),
        }
    }
}

/// Merge the configured per-segment overrides into every attribute of every
/// group. Label 0 never reaches an emitted group, but the guard stays so a
/// hand-written metadata file run through this path keeps its background
/// entry untouched.
pub fn apply_segment_overrides(groups: &mut [Vec<Value>], overrides: &PropMap) {
    if overrides.is_empty() {
        return;
    }
    for group in groups.iter_mut() {
        for attribute in group.iter_mut() {
            let Value::Object(fields) = attribute else {
                continue;
            };
            if fields.get("labelID").and_then(Value::as_u64) == Some(0) {
                continue;
            }
            for (key, value) in overrides {
                let value = serde_json::to_value(value).unwrap_or(Value::Null);
                fields.insert(key.clone(), value);
            }
        }
    }
}

/// Write the document with alphabetically sorted keys and 4-space indentation.
///
/// Idempotent: an existing file at `path` is kept byte-for-byte and the call
/// reports `false` instead of overwriting.
pub fn write_json_idempotent(path: &Path, document: &SegmentationInformation) -> Result<bool> {
    if path.is_file() {
        info!(path = %path.display(), "metadata file exists already, keeping it");
        return Ok(false);
    }

    // Round-tripping through Value collapses the flattened extras and the
    // named fields into one map with BTreeMap ordering.
    let value =
        serde_json::to_value(document).context("Failed to serialize segmentation information")?;

    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .context("Failed to render segmentation information JSON")?;

    info!(path = %path.display(), "writing metadata JSON");
    fs::write(path, &buffer)
        .with_context(|| format!("Failed to write metadata JSON {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::{self, PropValue};
    use tempfile::tempdir;

    fn attribute(label_id: u32) -> Value {
        serde_json::json!({ "labelID": label_id, "SegmentLabel": "x" })
    }

    #[test]
    fn overrides_reach_every_segment_except_background() {
        let overrides = props::parse("SegmentAlgorithmName=unet;SegmentNumber=7").unwrap();
        let mut groups = vec![vec![attribute(1)], vec![attribute(0), attribute(2)]];
        apply_segment_overrides(&mut groups, &overrides);

        assert_eq!(groups[0][0]["SegmentAlgorithmName"], "unet");
        assert_eq!(groups[0][0]["SegmentNumber"], 7);
        assert_eq!(groups[1][1]["SegmentNumber"], 7);
        // background entry untouched
        assert!(groups[1][0].get("SegmentNumber").is_none());
    }

    #[test]
    fn document_keys_are_sorted_and_indented() {
        let mut extra = PropMap::new();
        extra.insert("TumorVolume".into(), PropValue::Float(1.5));
        let mut document = SegmentationInformation::new("creator", 300, 1, extra);
        document.series_description = "desc".into();
        document.segment_attributes = vec![vec![attribute(1)]];

        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");
        assert!(write_json_idempotent(&path, &document).unwrap());

        let rendered = std::fs::read_to_string(&path).unwrap();
        let schema_at = rendered.find("\"@schema\"").unwrap();
        let creator_at = rendered.find("\"ContentCreatorName\"").unwrap();
        let attrs_at = rendered.find("\"segmentAttributes\"").unwrap();
        assert!(schema_at < creator_at && creator_at < attrs_at);
        assert!(rendered.contains("    \"@schema\""));
        assert!(rendered.contains("\"TumorVolume\": 1.5"));
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let document = SegmentationInformation::new("creator", 300, 1, PropMap::new());
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");

        assert!(write_json_idempotent(&path, &document).unwrap());
        let first = std::fs::read(&path).unwrap();

        let mut changed = document.clone();
        changed.series_description = "something else".into();
        assert!(!write_json_idempotent(&path, &changed).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }
}
