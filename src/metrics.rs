//! Segmentation metrics and losses the network was trained with.
//!
//! They are registered as custom objects so the exported graph can be
//! validated at load, and they score predicted masks in evaluation mode.

use ndarray::prelude::*;
use serde::Serialize;

/// Fuzz factor matching the Keras backend default.
pub const EPSILON: f32 = 1e-7;
const DICE_SMOOTH: f32 = 1e-6;

const TVERSKY_ALPHA: f32 = 0.7;
const TVERSKY_BETA: f32 = 0.3;
const TVERSKY_GAMMA: f32 = 4.0 / 3.0;

fn true_positives(y_true: &ArrayViewD<f32>, y_pred: &ArrayViewD<f32>) -> f32 {
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| (t * p).clamp(0.0, 1.0).round())
        .sum()
}

fn rounded_sum(values: &ArrayViewD<f32>) -> f32 {
    values.iter().map(|&v| v.clamp(0.0, 1.0).round()).sum()
}

pub fn dice_coefficient(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    let intersection: f32 = y_true.iter().zip(y_pred.iter()).map(|(&t, &p)| t * p).sum();
    (2.0 * intersection + DICE_SMOOTH) / (y_true.sum() + y_pred.sum() + DICE_SMOOTH)
}

pub fn precision_metric(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    true_positives(&y_true, &y_pred) / (rounded_sum(&y_pred) + EPSILON)
}

pub fn recall_metric(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    true_positives(&y_true, &y_pred) / (rounded_sum(&y_true) + EPSILON)
}

pub fn f1_score(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    let precision = precision_metric(y_true.view(), y_pred.view());
    let recall = recall_metric(y_true, y_pred);
    2.0 * ((precision * recall) / (precision + recall + EPSILON))
}

pub fn iou_metric(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    let (mut intersection, mut truth, mut predicted) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        let t = if t > 0.5 { 1.0 } else { 0.0 };
        let p = if p > 0.5 { 1.0 } else { 0.0 };
        intersection += t * p;
        truth += t;
        predicted += p;
    }
    intersection / (truth + predicted - intersection + EPSILON)
}

/// Focal Tversky loss averaged over the batch.
///
/// A 4-D input is treated as NHWC with one sample per leading index; any
/// other rank is a single sample.
pub fn focal_tversky_loss(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    let samples: Vec<(ArrayViewD<f32>, ArrayViewD<f32>)> = if y_true.ndim() == 4 {
        y_true
            .outer_iter()
            .zip(y_pred.outer_iter())
            .collect()
    } else {
        vec![(y_true.view(), y_pred.view())]
    };
    if samples.is_empty() {
        return 0.0;
    }

    let total: f32 = samples
        .iter()
        .map(|(t, p)| {
            let (mut tp, mut fp, mut fn_) = (0.0_f32, 0.0_f32, 0.0_f32);
            for (&t, &p) in t.iter().zip(p.iter()) {
                tp += t * p;
                fp += (1.0 - t) * p;
                fn_ += t * (1.0 - p);
            }
            let tversky =
                (tp + EPSILON) / (tp + TVERSKY_ALPHA * fp + TVERSKY_BETA * fn_ + EPSILON);
            (1.0 - tversky).powf(TVERSKY_GAMMA)
        })
        .sum();
    total / samples.len() as f32
}

pub fn binary_crossentropy(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let total: f32 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| {
            let p = p.clamp(EPSILON, 1.0 - EPSILON);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / n as f32
}

pub fn combined_loss(y_true: ArrayViewD<f32>, y_pred: ArrayViewD<f32>) -> f32 {
    focal_tversky_loss(y_true.view(), y_pred.view()) + binary_crossentropy(y_true, y_pred)
}

/// Overlap scores of a predicted mask against a ground-truth mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentationScores {
    pub dice: f32,
    pub iou: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

impl SegmentationScores {
    pub fn compute<D: Dimension>(truth: ArrayView<f32, D>, predicted: ArrayView<f32, D>) -> Self {
        let truth = truth.into_dyn();
        let predicted = predicted.into_dyn();
        Self {
            dice: dice_coefficient(truth.view(), predicted.view()),
            iou: iou_metric(truth.view(), predicted.view()),
            precision: precision_metric(truth.view(), predicted.view()),
            recall: recall_metric(truth.view(), predicted.view()),
            f1: f1_score(truth, predicted),
        }
    }
}
