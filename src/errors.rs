use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server rejected upload with status {status}: {body}")]
    ServerRejection { status: u16, body: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Failed to save {} locally: {source}", .path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {}: {reason}", .path.display())]
    Delete { path: PathBuf, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload queue is closed")]
    QueueClosed,
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn server_rejection(status: u16, body: impl Into<String>) -> Self {
        Self::ServerRejection {
            status,
            body: body.into(),
        }
    }

    pub fn upload_failed(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transport(e) => !e.is_builder(),
            AppError::ServerRejection { .. } | AppError::Io(_) => true,
            _ => false,
        }
    }
}
