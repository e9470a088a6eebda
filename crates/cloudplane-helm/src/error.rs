//! Helm provider error types

use cloudplane_cloud::{NOT_READY_CODE, ProviderError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HelmError {
    #[error("helm not found. Please install: https://helm.sh/docs/intro/install/")]
    HelmNotFound,

    #[error("helm command failed: {0}")]
    CommandFailed(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Release {release} failed: {description}")]
    ReleaseFailed {
        release: String,
        description: String,
    },

    #[error("Release {release} is {status}")]
    ReleaseNotReady { release: String, status: String },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProviderError for HelmError {
    fn code(&self) -> &str {
        match self {
            HelmError::HelmNotFound => "HelmNotFound",
            HelmError::CommandFailed(_) => "CommandFailed",
            HelmError::ReleaseNotFound(_) => "ReleaseNotFound",
            HelmError::ReleaseFailed { .. } => "ReleaseFailed",
            HelmError::ReleaseNotReady { .. } => NOT_READY_CODE,
            HelmError::UnknownService(_) => "UnknownService",
            HelmError::InvalidRequest(_) => "InvalidRequest",
            HelmError::JsonError(_) => "Json",
            HelmError::IoError(_) => "Io",
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, HelmError>;
