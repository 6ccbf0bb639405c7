//
// encoder.rs
// seg2dcm
//
// Narrow synchronous boundary around the external DICOM-SEG encoder binary:
// arguments in, exit status and captured output out.
//

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::info;

/// One encoder invocation: input volumes, the metadata document describing
/// them, the output object and the source series the geometry comes from.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub inputs: Vec<PathBuf>,
    pub metadata: PathBuf,
    pub output: PathBuf,
    pub dicom_dir: PathBuf,
    pub skip_empty_slices: bool,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to launch encoder {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// Non-zero exit. `log` is the child's combined stdout/stderr; `hint` is
    /// non-empty when empty-slice skipping was off and empty slices are the
    /// likely cause.
    #[error("encoder exited with {status} while creating {output}.{hint}\n{log}")]
    Failed {
        status: String,
        output: PathBuf,
        hint: String,
        log: String,
    },
}

pub trait SegEncoder {
    /// Run one blocking encode. Returns the captured process output on
    /// success.
    fn encode(&self, request: &EncodeRequest) -> Result<String, EncodeError>;
}

/// Drives dcmqi's `itkimage2segimage` binary.
pub struct DcmqiEncoder {
    binary: PathBuf,
}

impl DcmqiEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// The encoder takes its input volumes as one comma-joined list argument.
fn join_inputs(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

impl SegEncoder for DcmqiEncoder {
    fn encode(&self, request: &EncodeRequest) -> Result<String, EncodeError> {
        let mut command = Command::new(&self.binary);
        if request.skip_empty_slices {
            command.arg("--skip");
        }
        command
            .arg("--inputImageList")
            .arg(join_inputs(&request.inputs))
            .arg("--inputMetadata")
            .arg(&request.metadata)
            .arg("--outputDICOM")
            .arg(&request.output)
            .arg("--inputDICOMDirectory")
            .arg(&request.dicom_dir);
        info!(command = ?command, "executing encoder");

        let output = command.output().map_err(|source| EncodeError::Spawn {
            command: self.binary.display().to_string(),
            source,
        })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let hint = if request.skip_empty_slices {
                String::new()
            } else {
                " The input may contain empty slices; enabling empty-slice \
                 skipping would drop them, which can leave the object unusable \
                 in some viewers."
                    .to_string()
            };
            return Err(EncodeError::Failed {
                status: output.status.to_string(),
                output: request.output.clone(),
                hint,
                log,
            });
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request(skip: bool) -> EncodeRequest {
        EncodeRequest {
            inputs: vec![PathBuf::from("/in/a.nii.gz"), PathBuf::from("/in/b.nii.gz")],
            metadata: PathBuf::from("/in/meta.json"),
            output: PathBuf::from("/out/seg.dcm"),
            dicom_dir: PathBuf::from("/dicom"),
            skip_empty_slices: skip,
        }
    }

    #[test]
    fn inputs_are_comma_joined() {
        assert_eq!(join_inputs(&request(false).inputs), "/in/a.nii.gz,/in/b.nii.gz");
    }

    #[test]
    fn missing_binary_reports_spawn_error() {
        let encoder = DcmqiEncoder::new("/definitely/not/here/itkimage2segimage");
        let err = encoder.encode(&request(false)).unwrap_err();
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }

    #[test]
    fn failure_without_skip_carries_empty_slice_hint() {
        // `false` exits non-zero and ignores its arguments, standing in for a
        // failing encoder.
        let encoder = DcmqiEncoder::new(Path::new("false"));
        match encoder.encode(&request(false)) {
            Err(EncodeError::Failed { hint, .. }) => assert!(hint.contains("empty slices")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn failure_with_skip_has_no_hint() {
        let encoder = DcmqiEncoder::new(Path::new("false"));
        match encoder.encode(&request(true)) {
            Err(EncodeError::Failed { hint, .. }) => assert!(hint.is_empty()),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
