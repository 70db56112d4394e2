use std::path::Path;

use ndarray::prelude::*;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;

use crate::errors::{PwatError, Result};
use crate::model::{open_session, SessionOptions};
use crate::traits::CategoryClassifier;

/// Tabular classifier exported as an ONNX ML graph.
///
/// The first input takes an `f32 [rows, n]` matrix and the first output
/// holds the labels.
pub struct OnnxClassifier {
    input_name: String,
    label_name: String,
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn load(path: &Path, options: SessionOptions) -> Result<Self> {
        let session = open_session(path, options)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PwatError::artifact(path, "classifier has no inputs"))?;
        let label_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PwatError::artifact(path, "classifier has no outputs"))?;

        tracing::info!(
            path = %path.display(),
            input = %input_name,
            label = %label_name,
            "classifier loaded"
        );

        Ok(Self {
            input_name,
            label_name,
            session: Mutex::new(session),
        })
    }
}

impl CategoryClassifier for OnnxClassifier {
    fn predict(&self, features: ArrayView2<f64>) -> Result<ArrayD<i64>> {
        let input = features.mapv(|v| v as f32);
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&input)?
        ])?;
        let labels = &outputs[self.label_name.as_str()];

        if let Ok(labels) = labels.try_extract_array::<i64>() {
            return Ok(labels.to_owned());
        }
        if let Ok(labels) = labels.try_extract_array::<f32>() {
            return Ok(labels.mapv(|v| v.round() as i64));
        }
        let labels = labels.try_extract_array::<f64>()?;
        Ok(labels.mapv(|v| v.round() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_artifact_error() {
        let result = OnnxClassifier::load(
            Path::new("modelos/Categoria4.onnx"),
            SessionOptions::default(),
        );
        match result {
            Err(err @ PwatError::ArtifactLoad { .. }) => {
                assert!(err.to_string().contains("Categoria4.onnx"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loading a missing file succeeded"),
        }
    }
}
