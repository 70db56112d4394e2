//! Named reconstruction entries for the segmentation network's custom layer,
//! metrics and losses.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::prelude::*;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{PwatError, Result};
use crate::metrics;

pub type MetricFn = fn(ArrayViewD<f32>, ArrayViewD<f32>) -> f32;
pub type LayerFactory = fn(&Value) -> Result<Box<dyn CustomLayer>>;

/// A layer rebuilt from its serialized configuration.
pub trait CustomLayer: fmt::Debug + Send + Sync {
    fn class_name(&self) -> &'static str;
}

#[derive(Clone, Copy)]
pub enum CustomObject {
    Layer(LayerFactory),
    Metric(MetricFn),
    Loss(MetricFn),
}

#[derive(Debug)]
pub enum ResolvedObject {
    Layer(Box<dyn CustomLayer>),
    Metric(MetricFn),
    Loss(MetricFn),
}

#[derive(Clone)]
pub struct CustomObjectRegistry {
    entries: BTreeMap<String, CustomObject>,
}

impl CustomObjectRegistry {
    /// Empty registry. `Default` holds the objects the network ships with.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, object: CustomObject) -> &mut Self {
        self.entries.insert(name.into(), object);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str, config: &Value) -> Result<ResolvedObject> {
        let object = self
            .entries
            .get(name)
            .ok_or_else(|| PwatError::Configuration {
                message: format!("custom object `{name}` is not registered"),
            })?;
        Ok(match object {
            CustomObject::Layer(factory) => ResolvedObject::Layer(factory(config)?),
            CustomObject::Metric(f) => ResolvedObject::Metric(*f),
            CustomObject::Loss(f) => ResolvedObject::Loss(*f),
        })
    }

    /// Resolves every entry of a `custom_objects` document: either an object
    /// of `name -> config` or a list of names.
    pub fn resolve_document(&self, json: &str) -> Result<Vec<(String, ResolvedObject)>> {
        let entries: Vec<(String, Value)> = match serde_json::from_str(json)? {
            Value::Object(map) => map.into_iter().collect(),
            Value::Array(names) => names
                .into_iter()
                .map(|name| match name {
                    Value::String(name) => Ok((name, Value::Null)),
                    other => Err(PwatError::Configuration {
                        message: format!("custom object name must be a string, got {other}"),
                    }),
                })
                .collect::<Result<_>>()?,
            other => {
                return Err(PwatError::Configuration {
                    message: format!("unsupported custom_objects document: {other}"),
                })
            }
        };

        entries
            .into_iter()
            .map(|(name, config)| {
                let resolved = self.resolve(&name, &config)?;
                tracing::debug!(name = %name, "custom object resolved");
                Ok((name, resolved))
            })
            .collect()
    }
}

impl Default for CustomObjectRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register("SpatialAttention", CustomObject::Layer(SpatialAttention::factory))
            .register("dice_coefficient", CustomObject::Metric(metrics::dice_coefficient))
            .register("iou_metric", CustomObject::Metric(metrics::iou_metric))
            .register("precision_metric", CustomObject::Metric(metrics::precision_metric))
            .register("recall_metric", CustomObject::Metric(metrics::recall_metric))
            .register("f1_score", CustomObject::Metric(metrics::f1_score))
            .register("combined_loss", CustomObject::Loss(metrics::combined_loss))
            .register("focal_tversky_loss", CustomObject::Loss(metrics::focal_tversky_loss));
        registry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    Relu,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Linear => x,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KernelSize {
    Square(usize),
    Pair([usize; 2]),
}

#[derive(Deserialize)]
struct SpatialAttentionConfig {
    #[serde(default = "default_kernel_size")]
    kernel_size: KernelSize,
    #[serde(default = "default_filters")]
    filters: usize,
    #[serde(default = "default_activation")]
    activation: Activation,
}

const fn default_kernel_size() -> KernelSize {
    KernelSize::Square(7)
}

const fn default_filters() -> usize {
    1
}

const fn default_activation() -> Activation {
    Activation::Sigmoid
}

/// Spatial attention block: a bias-free same-padded convolution produces a
/// per-pixel weighting that is multiplied element-wise with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialAttention {
    pub kernel_size: usize,
    pub filters: usize,
    pub activation: Activation,
}

impl Default for SpatialAttention {
    fn default() -> Self {
        Self {
            kernel_size: 7,
            filters: 1,
            activation: Activation::Sigmoid,
        }
    }
}

impl CustomLayer for SpatialAttention {
    fn class_name(&self) -> &'static str {
        "SpatialAttention"
    }
}

impl SpatialAttention {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: SpatialAttentionConfig = match config {
            Value::Null => return Ok(Self::default()),
            other => serde_json::from_value(other.clone()).map_err(|e| PwatError::Configuration {
                message: format!("invalid SpatialAttention config: {e}"),
            })?,
        };
        let kernel_size = match config.kernel_size {
            KernelSize::Square(k) => k,
            KernelSize::Pair([h, w]) if h == w => h,
            KernelSize::Pair([h, w]) => {
                return Err(PwatError::Configuration {
                    message: format!("SpatialAttention kernel must be square, got {h}x{w}"),
                })
            }
        };
        if kernel_size == 0 || config.filters == 0 {
            return Err(PwatError::Configuration {
                message: "SpatialAttention kernel_size and filters must be positive".to_string(),
            });
        }
        Ok(Self {
            kernel_size,
            filters: config.filters,
            activation: config.activation,
        })
    }

    fn factory(config: &Value) -> Result<Box<dyn CustomLayer>> {
        Ok(Box::new(Self::from_config(config)?))
    }

    /// Applies the block to an `(H, W, C)` input with an HWIO kernel of shape
    /// `(k, k, C, filters)`.
    ///
    /// Reference implementation of the layer's forward pass. Inference runs
    /// the exported graph; this is for checking extracted weights against it
    /// and is not called by the pipeline.
    pub fn apply(&self, input: ArrayView3<f32>, kernel: ArrayView4<f32>) -> Result<Array3<f32>> {
        let (height, width, channels) = input.dim();
        let k = self.kernel_size;
        if kernel.dim() != (k, k, channels, self.filters) {
            return Err(PwatError::Validation {
                field: "kernel".to_string(),
                reason: format!(
                    "expected shape {:?}, got {:?}",
                    (k, k, channels, self.filters),
                    kernel.dim()
                ),
            });
        }
        if self.filters != 1 && self.filters != channels {
            return Err(PwatError::Validation {
                field: "filters".to_string(),
                reason: format!("{} filters cannot weight {channels} channels", self.filters),
            });
        }

        let pad = (k - 1) / 2;
        let mut attention = Array3::<f32>::zeros((height, width, self.filters));
        for ((y, x, f), out) in attention.indexed_iter_mut() {
            let mut acc = 0.0_f32;
            for ky in 0..k {
                let Some(sy) = (y + ky).checked_sub(pad).filter(|&sy| sy < height) else {
                    continue;
                };
                for kx in 0..k {
                    let Some(sx) = (x + kx).checked_sub(pad).filter(|&sx| sx < width) else {
                        continue;
                    };
                    for c in 0..channels {
                        acc += input[[sy, sx, c]] * kernel[[ky, kx, c, f]];
                    }
                }
            }
            *out = self.activation.apply(acc);
        }

        Ok(&input * &attention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_covers_training_objects() {
        let registry = CustomObjectRegistry::default();
        for name in [
            "SpatialAttention",
            "dice_coefficient",
            "iou_metric",
            "precision_metric",
            "recall_metric",
            "f1_score",
            "combined_loss",
            "focal_tversky_loss",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
    }

    #[test]
    fn resolves_document_with_layer_config() -> Result<()> {
        let registry = CustomObjectRegistry::default();
        let document = json!({
            "SpatialAttention": {"name": "spatial_attention", "kernel_size": 5, "filters": 1, "activation": "sigmoid"},
            "dice_coefficient": null,
            "combined_loss": null
        })
        .to_string();

        let resolved = registry.resolve_document(&document)?;
        assert_eq!(resolved.len(), 3);
        assert!(matches!(resolved[0].1, ResolvedObject::Layer(ref l) if l.class_name() == "SpatialAttention"));
        assert!(matches!(resolved[2].1, ResolvedObject::Loss(_)));
        Ok(())
    }

    #[test]
    fn unknown_object_is_rejected() {
        let registry = CustomObjectRegistry::default();
        let err = registry
            .resolve_document(r#"["dice_coefficient", "mystery_layer"]"#)
            .unwrap_err();
        assert!(err.to_string().contains("mystery_layer"));
    }

    #[test]
    fn spatial_attention_config_accepts_pair_kernel() -> Result<()> {
        let layer = SpatialAttention::from_config(&json!({"kernel_size": [3, 3]}))?;
        assert_eq!(layer.kernel_size, 3);
        assert_eq!(layer.activation, Activation::Sigmoid);
        assert!(SpatialAttention::from_config(&json!({"kernel_size": [3, 5]})).is_err());
        Ok(())
    }

    #[test]
    fn zero_kernel_halves_input() -> Result<()> {
        let layer = SpatialAttention {
            kernel_size: 3,
            ..SpatialAttention::default()
        };
        let input = Array3::<f32>::from_elem((4, 4, 2), 0.8);
        let kernel = Array4::<f32>::zeros((3, 3, 2, 1));

        // sigmoid(0) = 0.5 everywhere
        let output = layer.apply(input.view(), kernel.view())?;
        assert_eq!(output.dim(), (4, 4, 2));
        assert!(output.iter().all(|&v| (v - 0.4).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn same_padding_sees_fewer_neighbours_at_borders() -> Result<()> {
        let layer = SpatialAttention {
            kernel_size: 3,
            activation: Activation::Linear,
            ..SpatialAttention::default()
        };
        let input = Array3::<f32>::ones((3, 3, 1));
        let kernel = Array4::<f32>::ones((3, 3, 1, 1));

        let output = layer.apply(input.view(), kernel.view())?;
        assert_eq!(output[[1, 1, 0]], 9.0);
        assert_eq!(output[[0, 0, 0]], 4.0);
        assert_eq!(output[[0, 1, 0]], 6.0);
        Ok(())
    }
}
