use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};

use crate::error::AppError;

pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
pub struct FilePart {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Pulls the `file` part out of a multipart body, skipping other fields.
/// Reading stops as soon as the part grows past `max_bytes`.
pub async fn read_file_field(mut payload: Multipart, max_bytes: usize) -> Result<FilePart, AppError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?;
            if data.len() + chunk.len() > max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "File too large (limit is {} bytes)",
                    max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        if filename.is_empty() {
            return Err(AppError::Validation("No file selected".to_string()));
        }
        return Ok(FilePart { filename, data });
    }
    Err(AppError::Validation("No file provided".to_string()))
}
