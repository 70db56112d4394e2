pub mod artifacts;
pub mod category;
pub mod classifier;
pub mod config;
pub mod custom_objects;
pub mod errors;
pub mod features;
pub mod metrics;
pub mod model;
pub mod nrrd;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod traits;

pub mod mocks;

pub use artifacts::{ArtifactOptions, ModelArtifacts};
pub use category::Category;
pub use classifier::{classify_all, CategoryOutcome, ClassificationReport};
pub use config::Config;
pub use custom_objects::CustomObjectRegistry;
pub use errors::{PwatError, Result};
pub use features::{FeatureLayout, PyRadiomicsCli};
pub use model::{OnnxSegmenter, SessionOptions};
pub use pipeline::{Pipeline, PipelineOptions};
pub use preprocess::FsImageSource;
pub use traits::*;
