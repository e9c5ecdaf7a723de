use crate::services::remote::RemoteError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Every failure the bridge can report to a caller.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("object `{name}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, name: String },
    #[error("object `{name}` in bucket `{bucket}` is already cached")]
    AlreadyCached { bucket: String, name: String },
    #[error("object `{name}` in bucket `{bucket}` has not finished uploading")]
    IncompleteUpload { bucket: String, name: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object name")]
    InvalidObjectName,
    #[error("declared size {expected} does not match {actual} bytes received")]
    SizeMismatch { expected: i64, actual: i64 },
    #[error("remote storage failure: {0}")]
    Remote(#[from] RemoteError),
    #[error("metadata store failure: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("cache i/o failure: {0}")]
    CacheIo(#[from] io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

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

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        let status = match &err {
            BridgeError::BucketNotFound(_) | BridgeError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            BridgeError::ObjectAlreadyExists { .. } | BridgeError::AlreadyCached { .. } => {
                StatusCode::CONFLICT
            }
            BridgeError::IncompleteUpload { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::InvalidBucketName { .. }
            | BridgeError::InvalidObjectName
            | BridgeError::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Remote(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Persistence(_) | BridgeError::CacheIo(_) => {
                tracing::error!("internal failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
