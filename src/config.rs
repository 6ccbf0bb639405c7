use std::path::PathBuf;

use clap::ValueEnum;

use crate::props::PropMap;

/// The two supported metadata build paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputMode {
    /// One mask file per segment; one document (and SEG object) per file.
    #[value(name = "single_label_segs")]
    SingleLabelSegs,
    /// One descriptor JSON per case listing all labels of one mask.
    #[value(name = "multi_label_seg")]
    MultiLabelSeg,
}

/// Where single-label mode takes each segment's label text from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleLabelSource {
    /// The mask file's root name is the label.
    FromFileName,
    /// One configured label text for every mask, e.g. "right@kidney".
    Fixed(String),
}

/// Validated run configuration, threaded explicitly through the batch driver
/// instead of living in process-wide state.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Root directory holding one subdirectory per case.
    pub batch_dir: PathBuf,
    /// Per-case subdirectory names.
    pub dicom_dir: String,
    pub seg_dir: String,
    pub output_dir: String,
    /// Subdirectory with a reference volume for empty-mask synthesis.
    pub base_image_dir: Option<String>,

    pub mode: InputMode,
    pub algorithm_name: String,
    pub algorithm_type: String,
    pub creator_name: String,
    pub series_description: String,
    pub series_number: u32,
    pub instance_number: u32,

    pub skip_empty_slices: bool,
    pub fail_on_no_segmentation: bool,
    pub allow_empty_segmentation: bool,
    pub empty_segmentation_label: u8,

    pub multi_label_seg_name: String,
    pub seg_info_filename: String,
    pub single_label_source: Option<SingleLabelSource>,
    pub combine_single_label_segs: bool,

    /// Document-level extras merged into every metadata document.
    pub meta_props: PropMap,
    /// Per-segment attribute overrides.
    pub segment_props: PropMap,

    pub encoder_bin: PathBuf,
}

/// Empty strings and the literal "None" both mean unset; upstream pipelines
/// forward unset options that way.
pub fn or_default(value: &str, default: &str) -> String {
    match value.trim() {
        "" | "None" => default.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_markers_fall_back() {
        assert_eq!(or_default("", "multi-label"), "multi-label");
        assert_eq!(or_default("None", "multi-label"), "multi-label");
        assert_eq!(or_default(" my object ", "multi-label"), "my object");
    }
}
