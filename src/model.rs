use std::path::Path;

use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::{
    custom_objects::CustomObjectRegistry,
    errors::{PwatError, Result},
    traits::SegmentationModel,
};

/// ネットワークのカスタムレイヤー・関数一覧を格納するメタデータキー
pub const CUSTOM_OBJECTS_METADATA_KEY: &str = "custom_objects";

/// 全ONNXアーティファクト共通のセッション設定
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub device_id: i32,
    pub intra_threads: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_id: 0,
            intra_threads: 1,
        }
    }
}

pub(crate) fn open_session(path: &Path, options: SessionOptions) -> Result<Session> {
    let session = SessionBuilder::new()
        .map_err(|e| PwatError::artifact(path, format!("session builder: {e}")))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(options.device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(options.device_id)
                .build(),
        ])
        .map_err(|e| PwatError::artifact(path, format!("execution providers: {e}")))?
        .with_intra_threads(options.intra_threads)
        .map_err(|e| PwatError::artifact(path, format!("intra threads: {e}")))?
        .commit_from_file(path)
        .map_err(|e| PwatError::artifact(path, e))?;
    Ok(session)
}

/// ONNXにエクスポートされたセグメンテーションモデル（入出力はNHWC）
pub struct OnnxSegmenter {
    image_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxSegmenter {
    /// モデルを読み込み、カスタムオブジェクトを`registry`で検証してからウォームアップ推論を1回実行
    ///
    /// 入力形状が動的な場合は`fallback_size`を使用
    pub fn new(
        model_path: &Path,
        registry: &CustomObjectRegistry,
        options: SessionOptions,
        fallback_size: u32,
    ) -> Result<Self> {
        let mut session = open_session(model_path, options)?;

        let custom_objects = session
            .metadata()
            .and_then(|metadata| metadata.custom(CUSTOM_OBJECTS_METADATA_KEY))
            .map_err(|e| PwatError::artifact(model_path, format!("metadata: {e}")))?;
        match custom_objects {
            Some(json) => {
                let resolved = registry
                    .resolve_document(&json)
                    .map_err(|e| PwatError::artifact(model_path, e))?;
                tracing::debug!(count = resolved.len(), "custom objects resolved");
            }
            None => tracing::debug!(
                path = %model_path.display(),
                "network declares no custom objects"
            ),
        }

        let input = session
            .inputs
            .first()
            .ok_or_else(|| PwatError::artifact(model_path, "network has no inputs"))?;
        let input_name = input.name.clone();
        // NHWC: [batch, height, width, channels]
        let image_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(1).copied())
            .filter(|&side| side > 0)
            .map_or(fallback_size, |side| side as u32);
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PwatError::artifact(model_path, "network has no outputs"))?;

        tracing::info!(
            path = %model_path.display(),
            input = %input_name,
            output = %output_name,
            image_size,
            "segmentation network loaded"
        );

        // initialize model
        let data = Array4::<f32>::zeros((1, image_size as usize, image_size as usize, 3));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| PwatError::artifact(model_path, format!("warm-up tensor: {e}")))?])
            .map_err(|e| PwatError::artifact(model_path, format!("warm-up run: {e}")))?;

        Ok(Self {
            image_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl SegmentationModel for OnnxSegmenter {
    fn image_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, batch: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&batch.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

/// 前処理済みの`(H, W, C)`画像1枚を推論し、`(H, W, 1)`の確率マップを返す
pub fn predict_mask(model: &dyn SegmentationModel, image: ArrayView3<f32>) -> Result<Array3<f32>> {
    let (height, width, _) = image.dim();
    let batch = image.insert_axis(Axis(0));
    let prediction = model.predict(batch)?;

    let shape = prediction.shape();
    if shape[0] != 1 || shape[1] != height || shape[2] != width {
        return Err(PwatError::Model {
            operation: "mask prediction".to_string(),
            source: format!(
                "unexpected output shape {:?} for a {}x{} input",
                shape, height, width
            )
            .into(),
        });
    }

    Ok(prediction.index_axis_move(Axis(0), 0))
}
