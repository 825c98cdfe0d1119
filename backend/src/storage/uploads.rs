use std::path::PathBuf;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid filename")]
    InvalidFilename,
    #[error("Invalid file type")]
    InvalidFormat,
    #[error("File too large (limit is {limit} bytes)")]
    FileTooLarge { limit: usize },
    #[error("Image file not found: {0}")]
    NotFound(String),
    #[error("Upload storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uploaded images on local disk. Files are kept indefinitely.
#[derive(Clone, Debug)]
pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub filename: String,
    pub path: PathBuf,
}

impl UploadStore {
    pub fn open(root: impl Into<PathBuf>, max_bytes: usize) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
            log::info!("Created {} directory", root.display());
        }
        Ok(Self { root, max_bytes })
    }

    #[cfg(test)]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn validate_size(&self, len: usize) -> Result<(), StoreError> {
        if len > self.max_bytes {
            return Err(StoreError::FileTooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Validates the name before anything touches the disk, then writes
    /// through a temp file so readers never see a partial image.
    pub async fn save(&self, original_name: &str, data: &[u8]) -> Result<StoredUpload, StoreError> {
        if !allowed_file(original_name) {
            return Err(StoreError::InvalidFormat);
        }
        let filename = secure_filename(original_name).ok_or(StoreError::InvalidFilename)?;
        // Sanitizing can strip the dot itself (e.g. "/.png"), so check again.
        if !allowed_file(&filename) {
            return Err(StoreError::InvalidFormat);
        }
        self.validate_size(data.len())?;

        let path = self.root.join(&filename);
        let tmp = self.root.join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        log::info!("Stored upload {} ({} bytes)", filename, data.len());
        Ok(StoredUpload { filename, path })
    }

    /// Path of a previously stored upload; the name is sanitized first so it
    /// cannot escape the uploads directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let filename = secure_filename(name).ok_or(StoreError::InvalidFilename)?;
        let path = self.root.join(&filename);
        if !path.is_file() {
            return Err(StoreError::NotFound(filename));
        }
        Ok(path)
    }
}

/// Extension after the last dot, case-insensitive, must be whitelisted.
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Werkzeug-style filename sanitizer. Non-ASCII characters are dropped,
/// path separators become word breaks, words are joined with `_`, and only
/// `[A-Za-z0-9_.-]` survives. Returns `None` when nothing usable is left.
pub fn secure_filename(filename: &str) -> Option<String> {
    let ascii: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
