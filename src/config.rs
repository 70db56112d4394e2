use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use crate::errors::{PwatError, Result};
use crate::features::{FeatureLayout, PyRadiomicsCli};
use crate::model::SessionOptions;
use crate::pipeline::{PipelineOptions, DEFAULT_IMAGE_SIZE};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Predict the mask, then classify against it
    #[value(name = "mask_precit")]
    MaskPredict,
    /// Predict and save the mask only
    #[value(name = "predecir_mascara")]
    PredictMask,
    /// Classify an existing image/mask pair
    #[value(name = "predecir")]
    Classify,
    /// Score the predicted mask against a ground-truth mask
    #[value(name = "evaluate")]
    Evaluate,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "PWAT wound scoring", long_about = None)]
pub struct Config {
    #[arg(long, value_enum)]
    pub mode: Mode,

    #[arg(long, alias = "image_path")]
    pub image_path: PathBuf,

    #[arg(long, alias = "mask_path")]
    pub mask_path: Option<PathBuf>,

    #[arg(long, env = "PWAT_MODEL_DIR", default_value = "modelos")]
    pub model_dir: PathBuf,

    /// Base directory for `--image-path` in `predecir` mode
    #[arg(long, default_value = "predicts/imgs")]
    pub images_dir: PathBuf,

    /// Output directory for predicted masks, base directory for `--mask-path`
    #[arg(long, default_value = "predicts/masks")]
    pub masks_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    pub image_size: u32,

    #[arg(long, default_value_t = 0.5, value_parser = check_threshold)]
    pub threshold: f32,

    #[arg(long, env = "PYRADIOMICS_BIN", default_value = "pyradiomics")]
    pub pyradiomics_bin: PathBuf,

    /// Extraction parameter file handed to pyradiomics with `--param`
    #[arg(long, env = "PYRADIOMICS_PARAMS")]
    pub pyradiomics_params: Option<PathBuf>,

    /// JSON array of feature names to pass to the classifiers, in order.
    /// Without it the two leading columns are dropped.
    #[arg(long)]
    pub feature_columns: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, default_value_t = 1)]
    pub intra_threads: usize,
}

impl Config {
    /// Mask path required by the current mode.
    pub fn require_mask_path(&self) -> Result<&Path> {
        self.mask_path
            .as_deref()
            .ok_or_else(|| PwatError::Validation {
                field: "mask_path".to_string(),
                reason: "is required for this mode (--mask-path)".to_string(),
            })
    }

    pub fn extractor(&self) -> PyRadiomicsCli {
        let cli = PyRadiomicsCli::new(&self.pyradiomics_bin);
        match &self.pyradiomics_params {
            Some(params) => cli.with_params(params),
            None => cli,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            device_id: self.device_id,
            intra_threads: self.intra_threads,
        }
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        let feature_layout = match &self.feature_columns {
            Some(path) => FeatureLayout::from_allowlist_file(path)?,
            None => FeatureLayout::default(),
        };
        Ok(PipelineOptions {
            image_size: self.image_size,
            threshold: self.threshold,
            masks_dir: self.masks_dir.clone(),
            feature_layout,
        })
    }
}

fn check_threshold(s: &str) -> std::result::Result<f32, String> {
    let threshold: f32 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a number"))?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("{threshold} is outside [0, 1]"));
    }
    Ok(threshold)
}
