use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, Tag, VR};
use dicom::object::open_file;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::props::{PropMap, PropValue};

const CLINICAL_TRIAL_PROTOCOL_ID: Tag = Tag(0x0012, 0x0020);
const BODY_PART_EXAMINED: Tag = Tag(0x0018, 0x0015);
const CONTENT_LABEL: Tag = Tag(0x0070, 0x0080);
const CONTENT_DESCRIPTION: Tag = Tag(0x0070, 0x0081);

/// AE title written when the source series carries no protocol id.
const FALLBACK_AE_TITLE: &str = "internal";

fn first_dicom_file(dir: &Path) -> Result<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "dcm"))
        .collect();
    files.sort();
    files
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No DICOM file found in {}", dir.display()))
}

fn element_str(
    object: &dicom::object::DefaultDicomObject,
    tag: Tag,
) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Copy the AE title from the first file of the source series into the
/// produced SEG object, and set Body Part Examined. An explicitly supplied
/// body part wins over the series' own tag; with neither, the tag is left
/// out and a warning logged.
pub fn apply_series_tags(
    source_dicom_dir: &Path,
    seg_file: &Path,
    body_part: Option<&str>,
) -> Result<()> {
    let source_path = first_dicom_file(source_dicom_dir)?;
    info!(source = %source_path.display(), "reading series tags");
    let source = open_file(&source_path)
        .with_context(|| format!("Failed to open source DICOM file {}", source_path.display()))?;

    let aetitle =
        element_str(&source, CLINICAL_TRIAL_PROTOCOL_ID).unwrap_or_else(|| FALLBACK_AE_TITLE.to_string());
    let series_body_part = element_str(&source, BODY_PART_EXAMINED);

    let mut seg = open_file(seg_file)
        .with_context(|| format!("Failed to open produced SEG object {}", seg_file.display()))?;

    match (body_part, series_body_part) {
        (Some(part), _) => {
            info!(body_part = part, "adding configured body part");
            seg.put(DataElement::new(
                BODY_PART_EXAMINED,
                VR::LO,
                PrimitiveValue::from(part),
            ));
        }
        (None, Some(part)) => {
            info!(body_part = %part, "adding body part from source series");
            seg.put(DataElement::new(
                BODY_PART_EXAMINED,
                VR::LO,
                PrimitiveValue::from(part.as_str()),
            ));
        }
        (None, None) => {
            warn!(seg = %seg_file.display(), "could not determine any body part");
        }
    }

    info!(aetitle = %aetitle, "adding AE title");
    seg.put(DataElement::new(
        CLINICAL_TRIAL_PROTOCOL_ID,
        VR::LO,
        PrimitiveValue::from(aetitle.as_str()),
    ));

    seg.write_to_file(seg_file)
        .with_context(|| format!("Failed to save patched SEG object {}", seg_file.display()))
}

fn text_prop(props: &PropMap, key: &str) -> Option<String> {
    match props.get(key)? {
        PropValue::Text(text) => Some(text.clone()),
        PropValue::Int(number) => Some(number.to_string()),
        PropValue::Float(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Force ContentLabel/ContentDescription into the produced object when the
/// configured document properties carry them. Separate pass from
/// `apply_series_tags` so content overrides stay optional.
pub fn apply_content_tags(props: &PropMap, seg_file: &Path) -> Result<()> {
    let content_label = text_prop(props, "ContentLabel");
    let content_description = text_prop(props, "ContentDescription");
    if content_label.is_none() && content_description.is_none() {
        return Ok(());
    }

    info!(seg = %seg_file.display(), "updating content meta tags");
    let mut seg = open_file(seg_file)
        .with_context(|| format!("Failed to open produced SEG object {}", seg_file.display()))?;

    if let Some(value) = content_label {
        seg.put(DataElement::new(
            CONTENT_LABEL,
            VR::CS,
            PrimitiveValue::from(value.as_str()),
        ));
    }
    if let Some(value) = content_description {
        seg.put(DataElement::new(
            CONTENT_DESCRIPTION,
            VR::LO,
            PrimitiveValue::from(value.as_str()),
        ));
    }

    seg.write_to_file(seg_file)
        .with_context(|| format!("Failed to save patched SEG object {}", seg_file.display()))
}
