use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::db::user_repository::RepositoryError;
use crate::inference::PipelineError;
use crate::storage::uploads::StoreError;

/// Error surfaced to HTTP clients. Each variant keeps its own status code and
/// a stable `kind` so callers can tell failure causes apart.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    ModelLoad(String),
    #[error("{0}")]
    Inference(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Decode(_) => "decode",
            AppError::ModelLoad(_) => "model_load",
            AppError::Inference(_) => "inference",
            AppError::Internal(_) => "internal",
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Decode(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Inference(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, AppError::Internal(_) | AppError::Inference(_)) {
            log::error!("{}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.client_message(),
            kind: self.kind().to_string(),
        })
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(msg) => AppError::NotFound(msg),
            PipelineError::Decode(e) => AppError::Decode(format!("Unreadable image: {}", e)),
            PipelineError::ModelLoad(msg) => AppError::ModelLoad(format!("Model load failed: {}", msg)),
            PipelineError::Inference(msg) => AppError::Inference(format!("Prediction failed: {}", msg)),
            PipelineError::Label(e) => AppError::Inference(format!("Prediction failed: {}", e)),
            PipelineError::Io(e) => AppError::Internal(format!("I/O error during prediction: {}", e)),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidFilename | StoreError::InvalidFormat => {
                AppError::Validation(err.to_string())
            }
            StoreError::FileTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::Io(e) => AppError::Internal(format!("Upload storage error: {}", e)),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict => AppError::Conflict(err.to_string()),
            RepositoryError::Database(e) => AppError::Internal(format!("Database error: {}", e)),
        }
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}
