use std::path::Path;

use image::{imageops::FilterType, GrayImage};
use ndarray::prelude::*;
use nshare::{AsNdarray2, AsNdarray3};

use crate::errors::{PwatError, Result};
use crate::traits::ImageSource;

/// 画像をRGBで読み込み、`target_size` x `target_size`にリサイズして[0, 1]に正規化
///
/// 開けない・デコードできない場合は`None`を返す（致命的かは呼び出し側が判断）
pub fn load_and_preprocess_image(path: &Path, target_size: u32) -> Option<Array3<f32>> {
    let image = match image::open(path) {
        Ok(image) => image.into_rgb8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open image");
            return None;
        }
    };
    let image = image::imageops::resize(&image, target_size, target_size, FilterType::CatmullRom);

    // (C, H, W) -> (H, W, C)
    let tensor = image
        .as_ndarray3()
        .permuted_axes([1, 2, 0])
        .mapv(|v| f32::from(v) / 255.0);
    Some(tensor.as_standard_layout().into_owned())
}

/// マスクをグレースケールで読み込み、リサイズして`> 127`で二値化
///
/// 結果は末尾にチャンネル軸を持つ`(H, W, 1)`
pub fn load_and_preprocess_mask(path: &Path, target_size: u32) -> Option<Array3<f32>> {
    let mask = match image::open(path) {
        Ok(mask) => mask.into_luma8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open mask");
            return None;
        }
    };
    let mask = image::imageops::resize(&mask, target_size, target_size, FilterType::CatmullRom);

    let binary = mask
        .as_ndarray2()
        .mapv(|v| if v > 127 { 1.0_f32 } else { 0.0 });
    Some(binary.insert_axis(Axis(2)))
}

/// ファイルシステムから直接グレースケール画像を読み込む
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn read_grayscale(&self, path: &Path) -> Result<GrayImage> {
        let image = image::open(path).map_err(|source| PwatError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(image.into_luma8())
    }
}
