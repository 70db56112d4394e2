//! 読み込み済みアーティファクトを使った一連の処理

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::ModelArtifacts;
use crate::classifier::{classify_all, ClassificationReport};
use crate::errors::{PwatError, Result};
use crate::features::{extract_feature_row, FeatureLayout};
use crate::metrics::SegmentationScores;
use crate::model::predict_mask;
use crate::postprocess::{mask_output_path, postprocess_mask, save_mask};
use crate::preprocess::{load_and_preprocess_image, load_and_preprocess_mask};
use crate::traits::{ImageSource, RadiomicsExtractor};

pub const DEFAULT_IMAGE_SIZE: u32 = 256;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 特徴量抽出前に画像とマスクをリサイズする辺の長さ
    pub image_size: u32,
    pub threshold: f32,
    /// 予測マスクの保存先
    pub masks_dir: PathBuf,
    pub feature_layout: FeatureLayout,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            threshold: DEFAULT_THRESHOLD,
            masks_dir: PathBuf::from("predicts/masks"),
            feature_layout: FeatureLayout::default(),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(PwatError::Validation {
                field: "image_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PwatError::Validation {
                field: "threshold".to_string(),
                reason: format!("must be within [0, 1], got {}", self.threshold),
            });
        }
        Ok(())
    }
}

/// 読み込み済みアーティファクトと特徴量抽出器・設定
pub struct Pipeline {
    artifacts: ModelArtifacts,
    extractor: Box<dyn RadiomicsExtractor>,
    source: Box<dyn ImageSource>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        artifacts: ModelArtifacts,
        extractor: Box<dyn RadiomicsExtractor>,
        source: Box<dyn ImageSource>,
        options: PipelineOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            artifacts,
            extractor,
            source,
            options,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// `image_path`の二値化済み`(H, W, 1)`マスク（モデル入力サイズ）
    fn thresholded_mask(&self, image_path: &Path) -> Result<ndarray::Array3<f32>> {
        let segmenter = self.artifacts.segmenter();
        let image = load_and_preprocess_image(image_path, segmenter.image_size()).ok_or_else(
            || PwatError::ImageLoad {
                path: image_path.to_path_buf(),
            },
        )?;
        let prediction = predict_mask(segmenter, image.view())?;
        Ok(postprocess_mask(prediction.view(), self.options.threshold))
    }

    /// `image_path`のマスクを予測・二値化して保存
    ///
    /// 保存した`<masks_dir>/<stem>.jpg`のパスを返す
    pub fn predict_mask_file(&self, image_path: &Path) -> Result<PathBuf> {
        let mask = self.thresholded_mask(image_path)?;

        let masks_dir = &self.options.masks_dir;
        fs::create_dir_all(masks_dir).map_err(|source| PwatError::FileSystem {
            path: masks_dir.clone(),
            operation: "create masks directory".to_string(),
            source,
        })?;
        let save_path = mask_output_path(image_path, masks_dir)?;
        save_mask(mask.view(), &save_path)?;

        tracing::info!(image = %image_path.display(), mask = %save_path.display(), "mask saved");
        Ok(save_path)
    }

    /// 画像とマスクの特徴量行を抽出し、全カテゴリを分類
    pub fn classify(&self, image_path: &Path, mask_path: &Path) -> Result<ClassificationReport> {
        let table = extract_feature_row(
            self.extractor.as_ref(),
            self.source.as_ref(),
            image_path,
            mask_path,
            self.options.image_size,
            &self.options.feature_layout,
        )?;
        let row = table.to_matrix()?;
        tracing::debug!(columns = row.ncols(), "classifying feature row");
        Ok(classify_all(self.artifacts.classifiers(), row.view()))
    }

    /// マスクを予測してから、そのマスクで画像を分類
    pub fn run_full(&self, image_path: &Path) -> Result<ClassificationReport> {
        let mask_path = self.predict_mask_file(image_path)?;
        self.classify(image_path, &mask_path)
    }

    /// 予測マスクを正解マスクと比較して評価
    pub fn evaluate(&self, image_path: &Path, truth_path: &Path) -> Result<SegmentationScores> {
        let predicted = self.thresholded_mask(image_path)?;
        let (height, _, _) = predicted.dim();
        let truth = load_and_preprocess_mask(truth_path, height as u32).ok_or_else(|| {
            PwatError::ImageLoad {
                path: truth_path.to_path_buf(),
            }
        })?;
        Ok(SegmentationScores::compute(truth.view(), predicted.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_reject_out_of_range_values() {
        let mut options = PipelineOptions::default();
        assert!(options.validate().is_ok());

        options.threshold = 1.5;
        assert!(options.validate().is_err());

        options.threshold = 0.5;
        options.image_size = 0;
        assert!(options.validate().is_err());
    }
}
