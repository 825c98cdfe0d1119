pub mod config;
pub mod model;
pub mod preprocess;

use std::path::Path;
use std::sync::Arc;
use tch::Device;

use shared::{Condition, LabelError, Prediction};

use config::PreprocessingConfig;
use model::EyeClassifier;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    NotFound(String),
    #[error("Unreadable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Confidence is not computed; the field is kept for API compatibility.
pub const CONFIDENCE_PLACEHOLDER: &str = "High";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionResult {
    pub class_index: usize,
    pub condition: Condition,
}

impl PredictionResult {
    pub fn to_prediction(&self) -> Prediction {
        Prediction {
            condition: self.condition,
            description: self.condition.description().to_string(),
            confidence: CONFIDENCE_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Unavailable {
    Missing(String),
    Incompatible(String),
}

/// Process-wide classifier, loaded once at startup and shared read-only.
///
/// A failed startup load is remembered so that each prediction reports the
/// same error instead of the server refusing to start.
#[derive(Debug, Clone)]
pub struct ClassifierHandle {
    inner: Arc<Result<EyeClassifier, Unavailable>>,
}

impl ClassifierHandle {
    pub fn load(weights_path: &Path, config: PreprocessingConfig, device: Device) -> Self {
        let inner = match EyeClassifier::load(weights_path, config, device) {
            Ok(classifier) => Ok(classifier),
            Err(PipelineError::NotFound(msg)) => {
                log::error!("{}; predictions will fail until the server is restarted with it", msg);
                Err(Unavailable::Missing(msg))
            }
            Err(PipelineError::ModelLoad(msg)) => {
                log::error!("Failed to load model weights: {}", msg);
                Err(Unavailable::Incompatible(msg))
            }
            Err(e) => {
                log::error!("Failed to load model weights: {}", e);
                Err(Unavailable::Incompatible(e.to_string()))
            }
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_ok()
    }

    pub fn classifier(&self) -> Result<&EyeClassifier, PipelineError> {
        match self.inner.as_ref() {
            Ok(classifier) => Ok(classifier),
            Err(Unavailable::Missing(msg)) => Err(PipelineError::NotFound(msg.clone())),
            Err(Unavailable::Incompatible(msg)) => Err(PipelineError::ModelLoad(msg.clone())),
        }
    }

    /// Full pipeline for one stored upload: decode, normalize, forward, label.
    pub fn classify_file(&self, image_path: &Path) -> Result<PredictionResult, PipelineError> {
        let classifier = self.classifier()?;
        let input = preprocess::preprocess_file(image_path, classifier.config())?;
        let condition = classifier.predict_condition(&input)?;
        Ok(PredictionResult {
            class_index: condition.index(),
            condition,
        })
    }
}

/// `auto` picks CUDA when present.
pub fn parse_device(name: &str) -> Option<Device> {
    match name.trim().to_ascii_lowercase().as_str() {
        "auto" | "" => Some(Device::cuda_if_available()),
        "cpu" => Some(Device::Cpu),
        "cuda" | "gpu" => Some(Device::Cuda(0)),
        other => other
            .strip_prefix("cuda:")
            .and_then(|idx| idx.parse().ok())
            .map(Device::Cuda),
    }
}
