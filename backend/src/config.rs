use std::path::PathBuf;
use tch::Device;

use crate::inference::parse_device;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which HTTP surface a deployment serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Api,
    Forms,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub upload_folder: PathBuf,
    pub model_path: PathBuf,
    pub preprocessing_config: PathBuf,
    pub max_upload_bytes: usize,
    pub variant: Variant,
    pub device: Device,
}

impl Settings {
    /// Reads settings from the process environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = parse_with("PORT", get("PORT", "5000"), |v| {
            v.parse::<u16>().map_err(|e| e.to_string())
        })?;
        let max_upload_bytes = parse_with(
            "MAX_UPLOAD_BYTES",
            get("MAX_UPLOAD_BYTES", "16777216"),
            |v| match v.parse::<usize>() {
                Ok(0) => Err("must be positive".to_string()),
                Ok(n) => Ok(n),
                Err(e) => Err(e.to_string()),
            },
        )?;
        let variant = parse_with("EYECHECK_VARIANT", get("EYECHECK_VARIANT", "api"), |v| {
            match v.to_ascii_lowercase().as_str() {
                "api" | "json" => Ok(Variant::Api),
                "forms" | "html" => Ok(Variant::Forms),
                _ => Err("expected api or forms".to_string()),
            }
        })?;
        let device = parse_with("EYECHECK_DEVICE", get("EYECHECK_DEVICE", "auto"), |v| {
            parse_device(v).ok_or_else(|| "expected auto, cpu, cuda or cuda:N".to_string())
        })?;

        Ok(Self {
            host: get("HOST", "0.0.0.0"),
            port,
            database_url: get("DATABASE_URL", "sqlite://instance/database.db"),
            upload_folder: get("UPLOAD_FOLDER", "uploads").into(),
            model_path: get("MODEL_PATH", "models/MultipleEyeDiseaseDetectModel.safetensors").into(),
            preprocessing_config: get("PREPROCESSING_CONFIG", "config/preprocessing.yaml").into(),
            max_upload_bytes,
            variant,
            device,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding the SQLite file, if the URL names one.
    pub fn database_dir(&self) -> Option<PathBuf> {
        let path = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() || path.starts_with(":memory:") {
            return None;
        }
        PathBuf::from(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
    }
}

fn parse_with<T>(
    key: &'static str,
    value: String,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, SettingsError> {
    parse(value.trim()).map_err(|reason| SettingsError::Invalid { key, value, reason })
}
