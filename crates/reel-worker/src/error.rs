//! Worker error types.

use reel_models::{Failure, FailureKind};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {0} is already finished")]
    RunFinished(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] reel_adapters::AdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Classify a local media failure. Only timeouts are worth another attempt.
pub fn media_failure(err: reel_media::MediaError) -> Failure {
    let kind = if err.is_retryable() {
        FailureKind::Transient
    } else {
        FailureKind::Internal
    };
    Failure::new(kind, err.to_string())
}

/// Classify a storage failure inside a stage.
pub fn storage_failure(err: reel_storage::StorageError) -> Failure {
    Failure::internal(err.to_string())
}
