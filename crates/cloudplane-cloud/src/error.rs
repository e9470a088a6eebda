//! Generic cloud provider error types

use crate::provider::{NOT_READY_CODE, ProviderError};
use thiserror::Error;

/// Cloud provider errors
///
/// Adapters without a richer native error type can report failures with
/// this enum; it carries the provider-error capability so it survives the
/// activity boundary with its code intact.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Resource not ready: {0}")]
    ResourceNotReady(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("API error ({code}): {message}")]
    Api {
        code: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Shorthand for a provider API error without a wrapped cause
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }
}

impl ProviderError for CloudError {
    fn code(&self) -> &str {
        match self {
            CloudError::ResourceNotFound(_) => "ResourceNotFound",
            CloudError::ResourceAlreadyExists(_) => "ResourceAlreadyExists",
            CloudError::ResourceNotReady(_) => NOT_READY_CODE,
            CloudError::AccessDenied(_) => "AccessDenied",
            CloudError::Api { code, .. } => code,
            CloudError::InvalidConfig(_) => "InvalidConfig",
            CloudError::Timeout(_) => "Timeout",
            CloudError::Io(_) => "IoError",
            CloudError::Json(_) => "SerializationError",
        }
    }

    fn message(&self) -> String {
        match self {
            CloudError::ResourceNotFound(m)
            | CloudError::ResourceAlreadyExists(m)
            | CloudError::ResourceNotReady(m)
            | CloudError::AccessDenied(m)
            | CloudError::InvalidConfig(m)
            | CloudError::Timeout(m) => m.clone(),
            CloudError::Api { message, .. } => message.clone(),
            CloudError::Io(e) => e.to_string(),
            CloudError::Json(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(CloudError::ResourceNotFound("vpc".into()).code(), "ResourceNotFound");
        assert_eq!(CloudError::api("Throttling", "slow down").code(), "Throttling");
        assert!(CloudError::ResourceNotReady("cluster".into()).is_not_ready());
        assert!(!CloudError::Timeout("cluster".into()).is_not_ready());
    }

    #[test]
    fn test_api_cause_is_source() {
        let err = CloudError::Api {
            code: "InternalFailure".to_string(),
            message: "boom".to_string(),
            source: Some(Box::new(std::io::Error::other("socket closed"))),
        };
        assert_eq!(err.message(), "boom");
        assert_eq!(err.original_error().map(|c| c.to_string()).as_deref(), Some("socket closed"));
    }
}
