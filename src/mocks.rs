//! パイプラインのtrait用テストダブル

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::GrayImage;
use ndarray::prelude::*;
use parking_lot::Mutex;

use crate::errors::{PwatError, Result};
use crate::features::FeatureMap;
use crate::preprocess::FsImageSource;
use crate::traits::{CategoryClassifier, ImageSource, RadiomicsExtractor, SegmentationModel};

/// テスト用のモックセグメンテーションモデル（一定の確率を返す）
#[derive(Debug)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    value: f32,
    calls: AtomicUsize,
}

impl MockSegmentationModel {
    /// 全画素で0を返す
    pub const fn new(image_size: u32) -> Self {
        Self::constant(image_size, 0.0)
    }

    pub const fn constant(image_size: u32, value: f32) -> Self {
        Self {
            image_size,
            value,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn image_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let side = self.image_size as usize;
        Ok(Array4::from_elem((batch.shape()[0], side, side, 1), self.value))
    }
}

/// 常に同じラベルを返すテスト用分類器
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    label: i64,
}

impl FixedClassifier {
    pub const fn new(label: i64) -> Self {
        Self { label }
    }
}

impl CategoryClassifier for FixedClassifier {
    fn predict(&self, features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
        Ok(Array1::from_elem(features.nrows(), self.label).into_dyn())
    }
}

/// 予測が必ず失敗するテスト用分類器
#[derive(Debug, Clone)]
pub struct FailingClassifier {
    message: String,
}

impl FailingClassifier {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl CategoryClassifier for FailingClassifier {
    fn predict(&self, _features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
        Err(PwatError::Validation {
            field: "features".to_string(),
            reason: self.message.clone(),
        })
    }
}

/// 固定の特徴量マップを返し、入力パスを記録する抽出器
#[derive(Debug, Default)]
pub struct StaticExtractor {
    features: FeatureMap,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl StaticExtractor {
    pub fn new(features: FeatureMap) -> Self {
        Self {
            features,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().clone()
    }
}

impl RadiomicsExtractor for StaticExtractor {
    fn execute(&self, image_path: &Path, mask_path: &Path) -> Result<FeatureMap> {
        self.calls
            .lock()
            .push((image_path.to_path_buf(), mask_path.to_path_buf()));
        Ok(self.features.clone())
    }
}

/// 読み込んだパスを記録するファイルシステム画像ソース
#[derive(Debug, Default)]
pub struct CountingImageSource {
    reads: Mutex<Vec<PathBuf>>,
}

impl CountingImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> Vec<PathBuf> {
        self.reads.lock().clone()
    }
}

impl ImageSource for CountingImageSource {
    fn read_grayscale(&self, path: &Path) -> Result<GrayImage> {
        self.reads.lock().push(path.to_path_buf());
        FsImageSource.read_grayscale(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_model_output_is_nhwc() -> Result<()> {
        let mock = MockSegmentationModel::constant(64, 0.25);
        let batch = Array4::<f32>::zeros((2, 64, 64, 3));

        let out = mock.predict(batch.view())?;
        assert_eq!(out.shape(), &[2, 64, 64, 1]);
        assert!(out.iter().all(|&v| v == 0.25));
        assert_eq!(mock.calls(), 1);
        Ok(())
    }

    #[test]
    fn fixed_classifier_labels_every_row() -> Result<()> {
        let labels = FixedClassifier::new(7).predict(Array2::zeros((3, 2)).view())?;
        assert_eq!(labels, array![7_i64, 7, 7].into_dyn());
        Ok(())
    }

    #[test]
    fn counting_source_records_failed_reads() {
        let source = CountingImageSource::new();
        assert!(source.read_grayscale(Path::new("missing.png")).is_err());
        assert_eq!(source.reads(), vec![PathBuf::from("missing.png")]);
    }
}
