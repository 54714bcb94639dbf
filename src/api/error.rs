use crate::services::pipeline::PipelineError;
use crate::services::staging::StagingError;
use crate::services::transfer::TransferError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transfer failures keep their cause in the response body.
    pub fn upload_failed(e: &TransferError) -> Self {
        AppError::Internal(format!("Failed to upload to cluster: {}", e))
    }
}

impl From<StagingError> for AppError {
    fn from(e: StagingError) -> Self {
        match e {
            StagingError::NoFileProvided | StagingError::EmptyFilename => {
                AppError::BadRequest(e.to_string())
            }
            StagingError::WriteFailed(msg) => {
                AppError::Internal(format!("Failed to save file: {}", msg))
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Parameter(_) => AppError::BadRequest(e.to_string()),
            PipelineError::Allocation(_)
            | PipelineError::Staging(_)
            | PipelineError::Transfer(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
