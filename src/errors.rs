use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Every way an ingestion request can fail. All variants are terminal; the
/// pipeline never retries on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid image format")]
    InvalidFormat,
    #[error("Image size exceeds the limit")]
    TooLarge,
    #[error("Upload limit exceeded for today")]
    RateLimited,
    #[error("Failed to fetch image: {0}")]
    FetchFailed(String),
    #[error("Failed to store image: {0}")]
    StoreFailed(String),
    #[error("Image storage is not available on this server")]
    UnsupportedRuntime,
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::InvalidInput(_) | IngestError::InvalidFormat | IngestError::TooLarge => {
                StatusCode::BAD_REQUEST
            }
            IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngestError::FetchFailed(_) | IngestError::StoreFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            IngestError::UnsupportedRuntime => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::StoreFailed(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));

        (self.status, body).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}
