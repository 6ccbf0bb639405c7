//
// cli.rs
// seg2dcm
//
// Defines the flat option surface with Clap (every option is also reachable
// through an environment variable) and drives one batch run.
//

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};

use crate::batch::{self, RunSummary};
use crate::coding::CodeTable;
use crate::config::{or_default, InputMode, RunConfig, SingleLabelSource};
use crate::encoder::DcmqiEncoder;
use crate::mask::NiftiMaskSource;
use crate::props;

/// Boolean options take an explicit `true`/`false` value so the same strings
/// work on the command line and in environment variables.
#[derive(Parser)]
#[command(name = "seg2dcm")]
#[command(
    about = "Convert NIfTI/NRRD segmentation masks into DICOM SEG objects via an external dcmqi encoder",
    long_about = None
)]
pub struct Cli {
    /// Root directory holding one subdirectory per case
    #[arg(long, env = "BATCH_DIR")]
    pub batch_dir: PathBuf,

    /// Per-case subdirectory with the source DICOM series
    #[arg(long, env = "DICOM_DIR", default_value = "dicom")]
    pub dicom_dir: String,

    /// Per-case subdirectory with mask files (and the label descriptor in
    /// multi-label mode)
    #[arg(long, env = "SEG_DIR", default_value = "segmentations")]
    pub seg_dir: String,

    /// Per-case subdirectory receiving the produced DICOM SEG files
    #[arg(long, env = "OUTPUT_DIR", default_value = "dcmseg")]
    pub output_dir: String,

    /// Per-case subdirectory with a reference volume for empty-mask synthesis
    #[arg(long, env = "BASE_IMAGE_DIR")]
    pub base_image_dir: Option<String>,

    #[arg(long, env = "INPUT_TYPE", value_enum)]
    pub input_type: InputMode,

    #[arg(long, env = "ALGORITHM_NAME", default_value = "seg2dcm")]
    pub algorithm_name: String,

    #[arg(long, env = "ALGORITHM_TYPE", default_value = "AUTOMATIC")]
    pub algorithm_type: String,

    #[arg(long, env = "CREATOR_NAME", default_value = "seg2dcm")]
    pub creator_name: String,

    #[arg(long, env = "SERIES_DESCRIPTION", default_value = "")]
    pub series_description: String,

    #[arg(long, env = "SERIES_NUMBER", default_value_t = 300)]
    pub series_number: u32,

    #[arg(long, env = "INSTANCE_NUMBER", default_value_t = 1)]
    pub instance_number: u32,

    /// Pass --skip to the encoder so empty slices are left out of the object
    #[arg(long, env = "SKIP_EMPTY_SLICES", action = ArgAction::Set, default_value_t = false)]
    pub skip_empty_slices: bool,

    /// Abort the whole run when a case has no segmentation file (otherwise
    /// the case is skipped)
    #[arg(long, env = "FAIL_ON_NO_SEGMENTATION_FOUND", action = ArgAction::Set, default_value_t = true)]
    pub fail_on_no_segmentation: bool,

    /// Synthesize a placeholder mask for cases whose mask directory is empty
    #[arg(long, env = "ALLOW_EMPTY_SEGMENTATION", action = ArgAction::Set, default_value_t = false)]
    pub allow_empty_segmentation: bool,

    /// Label value written into synthesized/replaced empty masks
    #[arg(long, env = "EMPTY_SEGMENTATION_LABEL", default_value_t = 99)]
    pub empty_segmentation_label: u8,

    /// Name of the combined multi-label SEG object
    #[arg(long, env = "MULTI_LABEL_SEG_NAME", default_value = "multi-label")]
    pub multi_label_seg_name: String,

    /// File name of the per-case label descriptor (multi-label mode)
    #[arg(long, env = "MULTI_LABEL_SEG_INFO_JSON", default_value = "seg_info.json")]
    pub seg_info_json: String,

    /// "from_file_name", or a fixed label text such as "right@kidney"
    /// (single-label mode)
    #[arg(long, env = "SINGLE_LABEL_SEG_INFO")]
    pub single_label_seg_info: Option<String>,

    /// Additionally fold all single-label segments of a case into one
    /// combined multi-label object
    #[arg(long, env = "COMBINE_SINGLE_LABEL_SEGS", action = ArgAction::Set, default_value_t = false)]
    pub combine_single_label_segs: bool,

    /// Document-level properties, e.g. "ContentLabel=TUMOR;TumorVolume=1.5"
    #[arg(long, env = "ADDITIONAL_META_PROPS", default_value = "")]
    pub meta_props: String,

    /// Per-segment attribute overrides, same grammar as --meta-props
    #[arg(long, env = "SEGMENT_ATTRIBUTES_PROPS", default_value = "")]
    pub segment_props: String,

    /// Path of the external encoder binary
    #[arg(long, env = "ENCODER_BIN", default_value = "itkimage2segimage")]
    pub encoder_bin: PathBuf,
}

impl Cli {
    /// Validate the raw option set into a `RunConfig`. Every failure here is
    /// a configuration error, raised before any case is touched.
    pub fn into_config(self) -> Result<RunConfig> {
        let single_label_source = match self.input_type {
            InputMode::SingleLabelSegs => match self.single_label_seg_info.as_deref() {
                None | Some("") => bail!(
                    "--single-label-seg-info must be \"from_file_name\" or a label such as \"right@kidney\""
                ),
                Some("from_file_name") => Some(SingleLabelSource::FromFileName),
                Some(text) => Some(SingleLabelSource::Fixed(text.to_string())),
            },
            InputMode::MultiLabelSeg => None,
        };

        let meta_props = props::parse(&self.meta_props)?;
        let segment_props = props::parse(&self.segment_props)?;

        Ok(RunConfig {
            batch_dir: self.batch_dir,
            dicom_dir: self.dicom_dir,
            seg_dir: self.seg_dir,
            output_dir: self.output_dir,
            base_image_dir: self.base_image_dir,
            mode: self.input_type,
            algorithm_name: self.algorithm_name,
            algorithm_type: self.algorithm_type,
            creator_name: self.creator_name,
            series_description: self.series_description,
            series_number: self.series_number,
            instance_number: self.instance_number,
            skip_empty_slices: self.skip_empty_slices,
            fail_on_no_segmentation: self.fail_on_no_segmentation,
            allow_empty_segmentation: self.allow_empty_segmentation,
            empty_segmentation_label: self.empty_segmentation_label,
            multi_label_seg_name: or_default(&self.multi_label_seg_name, "multi-label"),
            seg_info_filename: or_default(&self.seg_info_json, "seg_info.json"),
            single_label_source,
            combine_single_label_segs: self.combine_single_label_segs,
            meta_props,
            segment_props,
            encoder_bin: self.encoder_bin,
        })
    }
}

/// Fail the process when a whole run produced nothing; print the summary
/// count otherwise.
pub fn report_summary(summary: &RunSummary) -> Result<()> {
    if summary.processed == 0 {
        eprintln!("##################  ERROR  #######################");
        eprintln!("# ----> NO FILES HAVE BEEN PROCESSED!");
        eprintln!("##################################################");
        bail!("NO FILES HAVE BEEN PROCESSED");
    }
    println!("# ----> {} FILES HAVE BEEN PROCESSED!", summary.processed);
    Ok(())
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Cli::parse().into_config()?;
    let table = CodeTable::bundled()?;
    let encoder = DcmqiEncoder::new(&config.encoder_bin);

    let summary = batch::run(&config, &table, &encoder, &NiftiMaskSource)?;
    report_summary(&summary)
}
