//! Application-level error type shared by the binary and the library.

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::index::IndexError;
use crate::pipeline::listing::SelectionError;
use crate::services::{JobServiceError, ObjectStoreError, ServiceError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Credentials(#[from] config::CredentialsError),
    #[error("{0}")]
    Usage(String),
    #[error("Key could not be found in bucket: {key}")]
    NotFound { key: String },
    #[error("{0}")]
    RateLimitExhausted(String),
    #[error(transparent)]
    Service(ServiceError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("index incomplete: {failed} job(s) failed; rerun to retry them")]
    IndexIncomplete { failed: usize },
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::KeyNotFound { key } => AppError::NotFound { key },
            err @ ServiceError::RateLimitExhausted { .. } => AppError::RateLimitExhausted(err.to_string()),
            ServiceError::Index(err) => AppError::Index(err),
            other => AppError::Service(other),
        }
    }
}

impl From<SelectionError> for AppError {
    fn from(err: SelectionError) -> Self {
        AppError::Usage(err.to_string())
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        AppError::Service(ServiceError::Store(err))
    }
}

impl From<JobServiceError> for AppError {
    fn from(err: JobServiceError) -> Self {
        AppError::Service(ServiceError::JobService(err))
    }
}
