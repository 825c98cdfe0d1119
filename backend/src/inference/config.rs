use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

use shared::Condition;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read preprocessing config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse preprocessing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid preprocessing config: {0}")]
    Invalid(String),
}

/// Max-pool stages in the network; each halves both spatial dims.
pub const POOL_STAGES: u32 = 3;

/// Preprocessing and topology constants the trained weights were produced with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub version: f32,
    pub image: ImageConfig,
    pub normalization: NormalizationConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// `[height, width]` the decoded image is resized to.
    pub size: Vec<u32>,
    pub channels: u32,
    #[serde(default)]
    pub resize_method: ResizeMethod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMethod {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeMethod {
    pub fn filter(self) -> FilterType {
        match self {
            ResizeMethod::Nearest => FilterType::Nearest,
            ResizeMethod::Triangle => FilterType::Triangle,
            ResizeMethod::CatmullRom => FilterType::CatmullRom,
            ResizeMethod::Gaussian => FilterType::Gaussian,
            ResizeMethod::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub hidden_units: i64,
    pub num_classes: i64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            version: 1.0,
            image: ImageConfig {
                size: vec![224, 224],
                channels: 3,
                resize_method: ResizeMethod::Triangle,
            },
            normalization: NormalizationConfig {
                mean: vec![0.485, 0.456, 0.406],
                std: vec![0.229, 0.224, 0.225],
            },
            model: ModelConfig {
                hidden_units: 48,
                num_classes: Condition::COUNT as i64,
            },
        }
    }
}

impl PreprocessingConfig {
    /// Reads the YAML contract at `path`, falling back to the built-in
    /// defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!(
                "Preprocessing config {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: PreprocessingConfig = serde_yaml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let min_side = 1u32 << POOL_STAGES;
        if self.image.size.len() != 2 || self.image.size.iter().any(|&side| side < min_side) {
            return invalid(format!(
                "image.size must be two values of at least {}, got {:?}",
                min_side, self.image.size
            ));
        }
        if self.image.channels != 3 {
            return invalid(format!(
                "image.channels must be 3, got {}",
                self.image.channels
            ));
        }
        let channels = self.image.channels as usize;
        if self.normalization.mean.len() != channels || self.normalization.std.len() != channels {
            return invalid(format!(
                "normalization.mean and normalization.std need {} entries each",
                channels
            ));
        }
        if self.normalization.std.iter().any(|s| !(*s > 0.0)) {
            return invalid("normalization.std entries must be positive".to_string());
        }
        if self.model.hidden_units <= 0 {
            return invalid("model.hidden_units must be positive".to_string());
        }
        if self.model.num_classes != Condition::COUNT as i64 {
            return invalid(format!(
                "model.num_classes must be {}, got {}",
                Condition::COUNT,
                self.model.num_classes
            ));
        }
        Ok(())
    }

    pub fn height(&self) -> u32 {
        self.image.size[0]
    }

    pub fn width(&self) -> u32 {
        self.image.size[1]
    }
}
