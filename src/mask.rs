use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, NiftiVolume, ReaderOptions};
use tracing::{debug, warn};

/// Mask-volume access as the batch driver needs it. Kept narrow so the
/// driver never touches volume internals and tests can substitute fakes.
pub trait MaskSource {
    /// Distinct integer voxel values in ascending order, including 0.
    fn unique_labels(&self, path: &Path) -> Result<Vec<u32>>;

    /// Write an all-zero mask with the geometry of `reference` to `target`.
    fn synthesize_empty(&self, reference: &Path, target: &Path) -> Result<()>;

    /// Rewrite an all-zero mask so it carries `label` in a single voxel,
    /// giving the encoder at least one segmented voxel to work with.
    /// Returns whether the mask was replaced.
    fn fill_empty_mask(&self, path: &Path, label: u8) -> Result<bool>;
}

/// Production implementation backed by the `nifti` crate. NRRD masks pass
/// through untouched: the encoder reads them itself, and the label scan
/// reports nothing so the caller falls back to its default label id.
pub struct NiftiMaskSource;

fn is_nifti(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

fn read_volume(path: &Path) -> Result<ArrayD<f32>> {
    let object = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read mask volume {}", path.display()))?;
    object
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("Failed to decode mask volume {}", path.display()))
}

impl MaskSource for NiftiMaskSource {
    fn unique_labels(&self, path: &Path) -> Result<Vec<u32>> {
        if !is_nifti(path) {
            debug!(path = %path.display(), "label scan supports NIfTI only, skipping");
            return Ok(Vec::new());
        }
        let volume = read_volume(path)?;
        let mut labels: Vec<u32> = Vec::new();
        for &voxel in volume.iter() {
            let label = voxel.round().max(0.0) as u32;
            if let Err(position) = labels.binary_search(&label) {
                labels.insert(position, label);
            }
        }
        Ok(labels)
    }

    fn synthesize_empty(&self, reference: &Path, target: &Path) -> Result<()> {
        let object = ReaderOptions::new()
            .read_file(reference)
            .with_context(|| format!("Failed to read reference volume {}", reference.display()))?;
        let shape: Vec<usize> = object
            .volume()
            .dim()
            .iter()
            .map(|&extent| extent as usize)
            .collect();
        let empty = ArrayD::<u8>::zeros(IxDyn(&shape));
        WriterOptions::new(target)
            .write_nifti(&empty)
            .with_context(|| format!("Failed to write placeholder mask {}", target.display()))
    }

    fn fill_empty_mask(&self, path: &Path, label: u8) -> Result<bool> {
        if !is_nifti(path) {
            return Ok(false);
        }
        let volume = read_volume(path)?;
        if volume.iter().any(|&voxel| voxel != 0.0) {
            return Ok(false);
        }
        let mut replacement = ArrayD::<u8>::zeros(IxDyn(volume.shape()));
        if let Some(first) = replacement.iter_mut().next() {
            *first = label;
        }
        WriterOptions::new(path)
            .write_nifti(&replacement)
            .with_context(|| format!("Failed to rewrite empty mask {}", path.display()))?;
        warn!(path = %path.display(), label, "mask was empty, inserted placeholder label");
        Ok(true)
    }
}
