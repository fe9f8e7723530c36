use serde::Serialize;
use thiserror::Error;

use crate::thumbnail::ThumbnailError;

/// Application-wide error types that serialize cleanly to JSON for frontend consumption.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// No authenticated session (or store handle) is bound to the session cache.
    #[error("No active session")]
    PreconditionNotMet,

    #[error("Remote operation failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upload failed with status {status}: {message}")]
    Upload { status: u16, message: String },

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("All {attempted} downloads failed")]
    AllDownloadsFailed { attempted: usize },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Status code reported to the UI collaborator alongside the error.
    pub fn status(&self) -> u16 {
        match self {
            AppError::Remote { status, .. } | AppError::Upload { status, .. } => *status,
            AppError::PreconditionNotMet => 401,
            AppError::InvalidInput(_) => 400,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => AppError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("Malformed record: {}", err))
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Archive(err.to_string())
    }
}

impl From<ThumbnailError> for AppError {
    fn from(err: ThumbnailError) -> Self {
        AppError::Thumbnail(err.to_string())
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;
