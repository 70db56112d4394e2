//! 起動時のセグメンテーションモデルと6つの分類器の読み込み

use std::path::Path;

use crate::category::{ArtifactFormat, Category};
use crate::classifier::{ForestClassifier, OnnxClassifier};
use crate::custom_objects::CustomObjectRegistry;
use crate::errors::{PwatError, Result};
use crate::model::{OnnxSegmenter, SessionOptions};
use crate::traits::{CategoryClassifier, SegmentationModel};

/// モデルディレクトリ内のセグメンテーションモデルのファイル名
pub const SEGMENTATION_MODEL_FILE: &str = "best_model.onnx";

/// 全ONNXアーティファクトのセッション設定
pub type ArtifactOptions = SessionOptions;

/// パイプラインが使う全モデル（一度だけ読み込み、以後変更しない）
pub struct ModelArtifacts {
    segmenter: Box<dyn SegmentationModel>,
    classifiers: Vec<(Category, Box<dyn CategoryClassifier>)>,
}

impl ModelArtifacts {
    /// `model_dir`から`best_model.onnx`と`Categoria3..8`を読み込む
    ///
    /// 欠落・読み込み不能なアーティファクトがあればその時点で中断
    pub fn load(
        model_dir: &Path,
        registry: &CustomObjectRegistry,
        options: ArtifactOptions,
        image_size: u32,
    ) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(PwatError::artifact(model_dir, "model directory not found"));
        }

        let segmenter = OnnxSegmenter::new(
            &model_dir.join(SEGMENTATION_MODEL_FILE),
            registry,
            options,
            image_size,
        )?;
        if segmenter.image_size() != image_size {
            tracing::warn!(
                configured = image_size,
                network = segmenter.image_size(),
                "network input size overrides configured image size"
            );
        }

        let classifiers = Category::ALL
            .iter()
            .map(|&category| {
                let path = model_dir.join(category.artifact_file_name());
                let classifier: Box<dyn CategoryClassifier> = match category.artifact_format() {
                    ArtifactFormat::Forest => Box::new(ForestClassifier::load(&path)?),
                    ArtifactFormat::Onnx => Box::new(OnnxClassifier::load(&path, options)?),
                };
                Ok((category, classifier))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            model_dir = %model_dir.display(),
            classifiers = classifiers.len(),
            "model artifacts loaded"
        );
        Ok(Self::from_parts(Box::new(segmenter), classifiers))
    }

    /// 構築済みのモデルから組み立てる（分類器は`Cat3..Cat8`の順）
    pub fn from_parts(
        segmenter: Box<dyn SegmentationModel>,
        classifiers: Vec<(Category, Box<dyn CategoryClassifier>)>,
    ) -> Self {
        Self {
            segmenter,
            classifiers,
        }
    }

    pub fn segmenter(&self) -> &dyn SegmentationModel {
        self.segmenter.as_ref()
    }

    pub fn classifiers(&self) -> &[(Category, Box<dyn CategoryClassifier>)] {
        &self.classifiers
    }
}
