use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pwat_rs::{
    config::{Config, Mode},
    CustomObjectRegistry, FsImageSource, ModelArtifacts, Pipeline,
};

/// Joins `path` onto `base` unless it is already absolute.
fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let options = config.pipeline_options()?;

    let registry = CustomObjectRegistry::default();
    let artifacts = ModelArtifacts::load(
        &config.model_dir,
        &registry,
        config.session_options(),
        config.image_size,
    )
    .with_context(|| format!("Failed to load models from {}", config.model_dir.display()))?;

    let pipeline = Pipeline::new(
        artifacts,
        Box::new(config.extractor()),
        Box::new(FsImageSource),
        options,
    )?;

    match config.mode {
        Mode::MaskPredict => {
            let report = pipeline.run_full(&config.image_path)?;
            println!("{}", report.to_json());
        }
        Mode::PredictMask => {
            let mask_path = pipeline.predict_mask_file(&config.image_path)?;
            println!("Mask saved at: {}", mask_path.display());
        }
        Mode::Classify => {
            let image_path = resolve(&config.images_dir, &config.image_path);
            let mask_path = resolve(&config.masks_dir, config.require_mask_path()?);
            let report = pipeline
                .classify(&image_path, &mask_path)
                .with_context(|| format!("Failed to classify {}", image_path.display()))?;
            println!("{}", report.to_json());
        }
        Mode::Evaluate => {
            let scores = pipeline.evaluate(&config.image_path, config.require_mask_path()?)?;
            println!("{}", serde_json::to_string(&scores)?);
        }
    }

    Ok(())
}
