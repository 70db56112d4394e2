use std::path::{Path, PathBuf};

use image::GrayImage;
use ndarray::prelude::*;
use num_traits::Float;

use crate::errors::{PwatError, Result};

/// 予測マスクファイルの拡張子
pub const MASK_EXTENSION: &str = "jpg";

/// 確率マップを二値化（`p > threshold`なら1、それ以外は0）
///
/// 閾値は全要素に適用される。閾値が`[0, 1)`なら再適用しても結果は変わらない
pub fn postprocess_mask<A, D>(pred_mask: ArrayView<A, D>, threshold: A) -> Array<A, D>
where
    A: Float,
    D: Dimension,
{
    pred_mask.mapv(|p| if p > threshold { A::one() } else { A::zero() })
}

/// 二値マスク`(H, W)`または`(H, W, 1)`を8bitグレースケール画像として保存
pub fn save_mask<D: Dimension>(mask: ArrayView<f32, D>, save_path: &Path) -> Result<()> {
    let mask = match mask.ndim() {
        2 => mask.into_dimensionality::<Ix2>()?,
        3 if mask.shape()[2] == 1 => mask
            .into_dimensionality::<Ix3>()?
            .index_axis_move(Axis(2), 0),
        _ => {
            return Err(PwatError::Validation {
                field: "mask".to_string(),
                reason: format!("expected (H, W) or (H, W, 1), got {:?}", mask.shape()),
            })
        }
    };

    let (height, width) = mask.dim();
    let pixels: Vec<u8> = mask
        .iter()
        .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
        .collect();
    let image = GrayImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
        PwatError::Validation {
            field: "mask".to_string(),
            reason: "pixel buffer does not match mask dimensions".to_string(),
        }
    })?;

    image
        .save(save_path)
        .map_err(|e| PwatError::ImageProcessing {
            path: save_path.display().to_string(),
            operation: "mask save".to_string(),
            source: Box::new(e),
        })
}

/// 入力画像パスに対する`<masks_dir>/<stem>.jpg`（元の拡張子は問わない）
pub fn mask_output_path(image_path: &Path, masks_dir: &Path) -> Result<PathBuf> {
    let stem = image_path
        .file_stem()
        .ok_or_else(|| PwatError::Validation {
            field: "image_path".to_string(),
            reason: format!("{} has no file name", image_path.display()),
        })?;
    // `with_extension`は使わない: `mar4.v2`のようなstemの途中のドットを残す
    let mut file_name = stem.to_os_string();
    file_name.push(".");
    file_name.push(MASK_EXTENSION);
    Ok(masks_dir.join(file_name))
}
