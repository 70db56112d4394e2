use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

use super::FeatureMap;
use crate::errors::{PwatError, Result};
use crate::traits::RadiomicsExtractor;

/// Bridge to the `pyradiomics` command line tool.
///
/// Runs `pyradiomics <image> <mask> --format json` and parses the JSON object
/// it prints, keeping the tool's key order.
#[derive(Debug, Clone)]
pub struct PyRadiomicsCli {
    executable: PathBuf,
    params: Option<PathBuf>,
}

impl PyRadiomicsCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            params: None,
        }
    }

    /// Extraction parameter file passed with `--param`.
    pub fn with_params(mut self, params: impl Into<PathBuf>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn params(&self) -> Option<&Path> {
        self.params.as_deref()
    }

    fn command(&self, image_path: &Path, mask_path: &Path) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(image_path)
            .arg(mask_path)
            .args(["--format", "json"]);
        if let Some(params) = &self.params {
            command.arg("--param").arg(params);
        }
        command
    }
}

impl Default for PyRadiomicsCli {
    fn default() -> Self {
        Self::new("pyradiomics")
    }
}

impl RadiomicsExtractor for PyRadiomicsCli {
    fn execute(&self, image_path: &Path, mask_path: &Path) -> Result<FeatureMap> {
        let output = self
            .command(image_path, mask_path)
            .output()
            .map_err(|e| {
                PwatError::extraction(format!(
                    "failed to launch {}: {e}",
                    self.executable.display()
                ))
            })?;

        if !output.status.success() {
            return Err(PwatError::extraction(format!(
                "{} exited with {}: {}",
                self.executable.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Input columns the command line echoes in front of each case's features.
pub const CASE_COLUMNS: [&str; 4] = ["Image", "Mask", "Label", "Label_channel"];

/// The tool prints one JSON object per case; the last one is ours. Case
/// columns are removed so the map starts with the diagnostics, as the
/// in-process extractor returns it.
fn parse_output(stdout: &str) -> Result<FeatureMap> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .last()
        .ok_or_else(|| PwatError::extraction("pyradiomics printed no JSON object"))?;

    match serde_json::from_str::<Value>(line)? {
        Value::Object(mut object) => {
            for column in CASE_COLUMNS {
                object.shift_remove(column);
            }
            Ok(FeatureMap::from_json_object(object))
        }
        other => Err(PwatError::extraction(format!(
            "expected a JSON object from pyradiomics, got {other}"
        ))),
    }
}
