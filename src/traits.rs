use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use ndarray::prelude::*;

use crate::errors::Result;
use crate::features::FeatureMap;

/// 画像セグメンテーションモデルの抽象化
///
/// パイプラインはONNXセッションではなくこの抽象に依存し、テストではモックに差し替える
pub trait SegmentationModel: Send + Sync {
    /// モデルの入力画像サイズを取得
    fn image_size(&self) -> u32;

    /// テンソル予測（低レベルAPI）: [0, 1]のNHWCバッチから確率のNHWCバッチ
    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// PWATカテゴリ1つ分の学習済み表形式分類器
pub trait CategoryClassifier: Send + Sync {
    /// `features`の各行のラベルを予測
    ///
    /// 行は列名を持たず、学習時の列順で値だけを並べたもの
    fn predict(&self, features: ArrayView2<f64>) -> Result<ArrayD<i64>>;
}

/// (画像, マスク)の中間ファイルからのradiomics特徴量抽出
pub trait RadiomicsExtractor: Send + Sync {
    /// 抽出器のキー順のままの特徴量マップ（診断キーを含む）
    fn execute(&self, image_path: &Path, mask_path: &Path) -> Result<FeatureMap>;
}

/// 特徴量抽出時のグレースケール画像読み込み
pub trait ImageSource: Send + Sync {
    fn read_grayscale(&self, path: &Path) -> Result<GrayImage>;
}

// 共有ハンドル
impl<T: ImageSource + ?Sized> ImageSource for Arc<T> {
    fn read_grayscale(&self, path: &Path) -> Result<GrayImage> {
        (**self).read_grayscale(path)
    }
}

impl<T: RadiomicsExtractor + ?Sized> RadiomicsExtractor for Arc<T> {
    fn execute(&self, image_path: &Path, mask_path: &Path) -> Result<FeatureMap> {
        (**self).execute(image_path, mask_path)
    }
}
