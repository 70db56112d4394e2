use std::path::PathBuf;
use thiserror::Error;

use crate::category::Category;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the PWAT scoring pipeline.
///
/// # Why structured errors
///
/// The pipeline has four failure classes with different handling: start-up
/// artifact failures abort, the image-load gate rejects input before any model
/// runs, a classifier failure only removes its own category from the result,
/// and read failures during feature extraction propagate untouched. Each
/// variant carries the path or category needed to tell them apart without
/// parsing strings.
#[derive(Error, Debug)]
pub enum PwatError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not load image: {}", path.display())]
    ImageLoad { path: PathBuf },

    #[error("Failed to read image {}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Mask {} has no foreground pixels (maximum value is 0)", path.display())]
    EmptyMask { path: PathBuf },

    #[error("Failed to load artifact {}: {reason}", path.display())]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Feature extraction error: {message}")]
    FeatureExtraction { message: String },

    #[error("Classifier {category} failed: {message}")]
    Classifier { category: Category, message: String },
}

pub type Result<T> = std::result::Result<T, PwatError>;

impl PwatError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArtifactLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn extraction(message: impl Into<String>) -> Self {
        Self::FeatureExtraction {
            message: message.into(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Callers with a known path should build `PwatError::FileSystem` directly.
impl From<std::io::Error> for PwatError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for PwatError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for PwatError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only occur while moving tensors in and out of a session, so
/// they are reported as model errors.
impl From<ndarray::ShapeError> for PwatError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for PwatError {
    fn from(err: serde_json::Error) -> Self {
        Self::FeatureExtraction {
            message: format!("invalid JSON: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_load_message_contains_path() {
        let err = PwatError::ImageLoad {
            path: PathBuf::from("wounds/missing_image.png"),
        };
        assert!(err.to_string().contains("wounds/missing_image.png"));
    }

    #[test]
    fn classifier_error_names_category() {
        let err = PwatError::Classifier {
            category: Category::Cat5,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Classifier Cat5 failed: boom");
    }
}
