//
// batch.rs
// seg2dcm
//
// Sequential batch driver: enumerates case directories, discovers mask
// files, builds the metadata document for the configured input mode, runs
// the external encoder and patches the produced SEG object.
//

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::coding::CodeTable;
use crate::colors;
use crate::config::{InputMode, RunConfig, SingleLabelSource};
use crate::encoder::{EncodeRequest, SegEncoder};
use crate::mask::MaskSource;
use crate::metadata::{self, SegmentationInformation};
use crate::patch;
use crate::segment;

/// Aggregated outcome of one batch run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Successful encoder invocations across all cases.
    pub processed: usize,
}

/// Accepted mask extensions, in root-name stripping precedence order.
const MASK_EXTENSIONS: &[&str] = &[".nii.gz", ".nii", ".nrrd"];

fn split_mask_extension(file_name: &str) -> Option<(&str, &str)> {
    MASK_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext).map(|root| (root, *ext)))
}

/// Mask files directly inside `dir`, sorted by name. A missing directory is
/// the same as an empty one.
fn collect_mask_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(split_mask_extension)
                .is_some()
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Per-case label descriptor consumed in multi-label mode.
#[derive(Debug, Deserialize)]
struct SegInfoFile {
    seg_info: Vec<SegInfoEntry>,
    task_body_part: Option<String>,
    algorithm: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegInfoEntry {
    #[serde(deserialize_with = "int_or_string")]
    label_int: i64,
    label_name: String,
}

/// Descriptors in the wild carry `label_int` both as a number and as a
/// numeric string.
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| D::Error::custom("label_int is not an integer")),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("label_int {text:?} is not an integer"))),
        other => Err(D::Error::custom(format!(
            "label_int must be an integer, got {other}"
        ))),
    }
}

/// Process every case under the configured batch directory, in lexicographic
/// order, one at a time.
pub fn run(
    config: &RunConfig,
    table: &CodeTable,
    encoder: &dyn SegEncoder,
    masks: &dyn MaskSource,
) -> Result<RunSummary> {
    let mut case_dirs: Vec<PathBuf> = fs::read_dir(&config.batch_dir)
        .with_context(|| format!("Failed to list batch directory {}", config.batch_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    case_dirs.sort();
    info!("found {} batch element(s)", case_dirs.len());

    let mut summary = RunSummary::default();
    for case_dir in &case_dirs {
        process_case(config, table, encoder, masks, case_dir, &mut summary)
            .with_context(|| format!("Failed to process batch element {}", case_dir.display()))?;
    }
    Ok(summary)
}

fn process_case(
    config: &RunConfig,
    table: &CodeTable,
    encoder: &dyn SegEncoder,
    masks: &dyn MaskSource,
    case_dir: &Path,
    summary: &mut RunSummary,
) -> Result<()> {
    info!("processing {}", case_dir.display());
    let input_dicom = case_dir.join(&config.dicom_dir);
    let mask_dir = case_dir.join(&config.seg_dir);
    let output_dir = case_dir.join(&config.output_dir);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    if config.allow_empty_segmentation {
        prepare_empty_masks(config, masks, case_dir, &mask_dir)?;
    }

    let seg_paths = collect_mask_files(&mask_dir)?;
    if seg_paths.is_empty() {
        warn!(
            "no segmentation file (*.nii, *.nii.gz, *.nrrd) in {}",
            mask_dir.display()
        );
        if config.fail_on_no_segmentation {
            bail!(
                "No segmentation input found in {} and --fail-on-no-segmentation is enabled",
                mask_dir.display()
            );
        }
        warn!("skipping {}", case_dir.display());
        return Ok(());
    }

    match config.mode {
        InputMode::SingleLabelSegs => process_single_label_case(
            config,
            table,
            encoder,
            masks,
            &input_dicom,
            &mask_dir,
            &output_dir,
            &seg_paths,
            summary,
        ),
        InputMode::MultiLabelSeg => process_multi_label_case(
            config,
            table,
            encoder,
            &input_dicom,
            &mask_dir,
            &output_dir,
            &seg_paths,
            summary,
        ),
    }
}

/// Ensure a case with empty-segmentation handling enabled has at least one
/// mask, and that no mask is entirely background.
fn prepare_empty_masks(
    config: &RunConfig,
    masks: &dyn MaskSource,
    case_dir: &Path,
    mask_dir: &Path,
) -> Result<()> {
    if collect_mask_files(mask_dir)?.is_empty() {
        let Some(base_subdir) = &config.base_image_dir else {
            warn!("empty-segmentation handling enabled but no --base-image-dir configured");
            return Ok(());
        };
        let base_dir = case_dir.join(base_subdir);
        let reference = collect_mask_files(&base_dir)?
            .into_iter()
            .find(|path| !path.to_string_lossy().ends_with(".nrrd"));
        let Some(reference) = reference else {
            warn!("no reference volume in {}", base_dir.display());
            return Ok(());
        };
        fs::create_dir_all(mask_dir)
            .with_context(|| format!("Failed to create {}", mask_dir.display()))?;
        let target = mask_dir.join("empty.nii.gz");
        masks.synthesize_empty(&reference, &target)?;
        info!("synthesized placeholder mask {}", target.display());
    }

    for path in collect_mask_files(mask_dir)? {
        masks.fill_empty_mask(&path, config.empty_segmentation_label)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_single_label_case(
    config: &RunConfig,
    table: &CodeTable,
    encoder: &dyn SegEncoder,
    masks: &dyn MaskSource,
    input_dicom: &Path,
    mask_dir: &Path,
    output_dir: &Path,
    seg_paths: &[PathBuf],
    summary: &mut RunSummary,
) -> Result<()> {
    let Some(label_source) = &config.single_label_source else {
        bail!("single-label mode requires --single-label-seg-info");
    };

    let mut combined_groups: Vec<Vec<Value>> = Vec::new();

    for (index, seg_path) in seg_paths.iter().enumerate() {
        let file_name = seg_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        // collect_mask_files only returns matching names
        let Some((root_name, _)) = split_mask_extension(file_name) else {
            continue;
        };
        info!(index, "processing mask {}", seg_path.display());

        let label_text = match label_source {
            SingleLabelSource::FromFileName => root_name.to_string(),
            SingleLabelSource::Fixed(text) => text.clone(),
        };
        let (code_meaning, series_description) =
            segment::seg_info_to_meaning(&label_text, &config.series_description);

        // Smallest non-zero voxel value is the segment's label id.
        let label_id = masks
            .unique_labels(seg_path)?
            .into_iter()
            .find(|&label| label != 0)
            .unwrap_or(1);

        let attribute = segment::build(
            table,
            &config.algorithm_type,
            &config.algorithm_name,
            &code_meaning,
            colors::color_for_name(root_name),
            "",
            label_id,
        );
        let mut group = vec![serde_json::to_value(&attribute)
            .context("Failed to serialize segment attribute")?];
        metadata::apply_segment_overrides(std::slice::from_mut(&mut group), &config.segment_props);

        if config.combine_single_label_segs {
            combined_groups.push(group.clone());
        }

        let mut document = SegmentationInformation::new(
            &config.creator_name,
            config.series_number,
            config.instance_number,
            config.meta_props.clone(),
        );
        document.series_description = series_description;
        document.segment_attributes = vec![group];

        let metadata_path = mask_dir.join(format!("{root_name}.json"));
        metadata::write_json_idempotent(&metadata_path, &document)?;

        let output_file = output_dir.join(format!("{root_name}.dcm"));
        let request = EncodeRequest {
            inputs: vec![seg_path.clone()],
            metadata: metadata_path,
            output: output_file.clone(),
            dicom_dir: input_dicom.to_path_buf(),
            skip_empty_slices: config.skip_empty_slices,
        };
        let log = encoder.encode(&request).with_context(|| {
            format!(
                "Failed to create single-label SEG object {}",
                output_file.display()
            )
        })?;
        debug!(%log, "encoder finished");

        patch::apply_series_tags(input_dicom, &output_file, None)?;
        summary.processed += 1;
    }

    if config.combine_single_label_segs {
        encode_combined(
            config,
            encoder,
            input_dicom,
            mask_dir,
            output_dir,
            seg_paths,
            combined_groups,
            None,
            &config.series_description,
            summary,
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_multi_label_case(
    config: &RunConfig,
    table: &CodeTable,
    encoder: &dyn SegEncoder,
    input_dicom: &Path,
    mask_dir: &Path,
    output_dir: &Path,
    seg_paths: &[PathBuf],
    summary: &mut RunSummary,
) -> Result<()> {
    let descriptor_path = mask_dir.join(&config.seg_info_filename);
    let raw = fs::read_to_string(&descriptor_path).with_context(|| {
        format!(
            "Failed to read label descriptor {}",
            descriptor_path.display()
        )
    })?;
    let descriptor: SegInfoFile = serde_json::from_str(&raw).with_context(|| {
        format!(
            "Invalid label descriptor {} (expected a \"seg_info\" list)",
            descriptor_path.display()
        )
    })?;
    info!(
        "loaded {} label(s) from {}",
        descriptor.seg_info.len(),
        descriptor_path.display()
    );

    // A descriptor-supplied algorithm name refines the series description.
    let series_description = match &descriptor.algorithm {
        Some(algorithm) => format!("{}-{}", config.algorithm_name, algorithm),
        None => config.series_description.clone(),
    };

    let label_count = descriptor.seg_info.len();
    let mut group: Vec<Value> = Vec::new();
    for (index, label) in descriptor.seg_info.iter().enumerate() {
        info!("process {}: {}", label.label_name, label.label_int);
        if label.label_int == 0 {
            info!("clear label, skipping");
            continue;
        }
        let label_id = u32::try_from(label.label_int).with_context(|| {
            format!(
                "label_int {} in {} is not a positive label id",
                label.label_int,
                descriptor_path.display()
            )
        })?;

        let (code_meaning, _) = segment::seg_info_to_meaning(&label.label_name, &series_description);
        let attribute = segment::build(
            table,
            &config.algorithm_type,
            &config.algorithm_name,
            &code_meaning,
            colors::categorical_color(index, label_count),
            &label.label_name,
            label_id,
        );
        group.push(
            serde_json::to_value(&attribute).context("Failed to serialize segment attribute")?,
        );
    }

    // "N/A" is the descriptor's way of saying no body part.
    let body_part = descriptor
        .task_body_part
        .as_deref()
        .filter(|part| *part != "N/A");

    encode_combined(
        config,
        encoder,
        input_dicom,
        mask_dir,
        output_dir,
        seg_paths,
        vec![group],
        body_part,
        &series_description,
        summary,
    )
}

/// Shared tail of the multi-label and combined single-label flows: one
/// metadata document, one encoder invocation over all masks, one patched
/// object.
#[allow(clippy::too_many_arguments)]
fn encode_combined(
    config: &RunConfig,
    encoder: &dyn SegEncoder,
    input_dicom: &Path,
    mask_dir: &Path,
    output_dir: &Path,
    seg_paths: &[PathBuf],
    mut groups: Vec<Vec<Value>>,
    body_part: Option<&str>,
    series_description: &str,
    summary: &mut RunSummary,
) -> Result<()> {
    let (_, series_description) =
        segment::seg_info_to_meaning(&config.multi_label_seg_name, series_description);
    metadata::apply_segment_overrides(&mut groups, &config.segment_props);

    let mut document = SegmentationInformation::new(
        &config.creator_name,
        config.series_number,
        config.instance_number,
        config.meta_props.clone(),
    );
    document.series_description = series_description;
    document.segment_attributes = groups;

    let object_name = config.multi_label_seg_name.to_lowercase();
    let metadata_path = mask_dir.join(format!("{object_name}.json"));
    metadata::write_json_idempotent(&metadata_path, &document)?;

    let output_file = output_dir.join(format!("{object_name}.dcm"));
    info!("output SEG file {}", output_file.display());
    let request = EncodeRequest {
        inputs: seg_paths.to_vec(),
        metadata: metadata_path,
        output: output_file.clone(),
        dicom_dir: input_dicom.to_path_buf(),
        skip_empty_slices: config.skip_empty_slices,
    };
    let log = encoder.encode(&request).with_context(|| {
        format!(
            "Failed to create multi-label SEG object {}",
            output_file.display()
        )
    })?;
    debug!(%log, "encoder finished");

    patch::apply_series_tags(input_dicom, &output_file, body_part)?;
    patch::apply_content_tags(&config.meta_props, &output_file)?;
    summary.processed += 1;
    Ok(())
}
