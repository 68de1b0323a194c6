use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::{
    ingest::IngestError, metadata_store::MetadataError, multipart::MultipartError,
    resolver::ResolveError,
};

/// Input rejected before any store is contacted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no file part in request")]
    MissingFile,
    #[error("no selected file")]
    MissingFilename,
    #[error("file is empty")]
    EmptyFile,
    #[error("hash prefix must be at least {min} characters, got {len}")]
    PrefixTooShort { len: usize, min: usize },
    #[error("hash prefix `{0}` is not hexadecimal")]
    InvalidPrefix(String),
    #[error("part size must be greater than zero")]
    ZeroPartSize,
    #[error("upload of {size} bytes needs {parts} parts, limit is {max}")]
    TooManyParts { size: u64, parts: u64, max: u64 },
}

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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 502 Bad Gateway, used for object-store and database failures.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
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

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::upstream(error_chain(&err))
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::Validation(inner) => inner.into(),
            MultipartError::Cancelled { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            MultipartError::Read { .. } => AppError::internal(error_chain(&err)),
            other => AppError::upstream(error_chain(&other)),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(inner) => inner.into(),
            IngestError::Multipart(inner) => inner.into(),
            IngestError::Store(_) => AppError::upstream(error_chain(&err)),
            IngestError::Cancelled => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            IngestError::Read(_) | IngestError::Untracked { .. } => {
                AppError::internal(error_chain(&err))
            }
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Validation(inner) => inner.into(),
            ResolveError::Metadata(inner) => inner.into(),
        }
    }
}

/// Join an error and its sources into one message so the upstream cause
/// reaches the client.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
