use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the annotation service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("graphql error: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("response is missing `{0}`")]
    MissingData(&'static str),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("operation did not complete: {0}")]
    Join(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn rejected(message: impl Into<String>) -> Self {
        ClientError::Rejected(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ClientError::Config(message.into())
    }

    /// Whether the request was refused before the server acted on it, so
    /// that even a non-idempotent request can be sent again.
    pub fn is_unapplied(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect(),
            ClientError::Status { status, .. } => *status == 429,
            _ => false,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised while preparing a mask upload, before any remote call.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("required manifest not found: {}", path.display())]
    MissingManifest { path: PathBuf },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mask {file} has no entry in the datapoint map")]
    UnmappedMask { file: String },
    #[error("failed to polygonize {file}: {message}")]
    Polygonize { file: String, message: String },
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
