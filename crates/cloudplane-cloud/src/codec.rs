//! Error codec for the activity boundary
//!
//! The durable-execution boundary only keeps a flat error name plus an
//! opaque payload ([`ActivityError`]). Provider errors are flattened into a
//! [`PortableError`] on the way out of an activity and rebuilt on the way
//! back so callers can still branch on the provider's error code.

use crate::provider::{OriginalError, ProviderError, ProviderFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag prefix marking a boundary error that carries a provider error
pub const PROVIDER_PREFIX: &str = "PROVIDER_";

const GENERIC_ERROR_TYPE: &str = "GenericError";
const CANCELED_ERROR_TYPE: &str = "CanceledError";

/// Provider error flattened to primitive fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub original_error: Option<String>,
}

impl PortableError {
    pub fn from_provider(err: &dyn ProviderError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.message(),
            original_error: err.original_error().map(|cause| cause.to_string()),
        }
    }

    /// Rebuild a provider-shaped error; an empty original error means no cause
    pub fn into_failure(self, code: &str) -> ProviderFailure {
        let cause = self
            .original_error
            .filter(|text| !text.is_empty())
            .map(OriginalError);
        ProviderFailure::new(code, self.message, cause)
    }
}

/// Error as it crosses the activity boundary: a type tag and an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{error_type}: {message}")]
pub struct ActivityError {
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub non_retryable: bool,
}

impl ActivityError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            details: None,
            non_retryable: false,
        }
    }

    /// Wrap an application error that has no provider capability
    pub fn application(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(GENERIC_ERROR_TYPE, message)
    }

    /// The activity observed cancellation
    pub fn cancelled() -> Self {
        Self::new(CANCELED_ERROR_TYPE, "activity cancelled").non_retryable()
    }

    pub fn non_retryable(mut self) -> Self {
        self.non_retryable = true;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_type == CANCELED_ERROR_TYPE
    }
}

/// Anything an activity can fail with, before encoding
#[derive(Debug)]
pub enum Failure {
    /// Error exposing the provider-error capability
    Provider(Box<dyn ProviderError>),
    /// Error already in boundary form (application errors, cancellation)
    Activity(ActivityError),
}

impl<E: ProviderError + 'static> From<E> for Failure {
    fn from(err: E) -> Self {
        Failure::Provider(Box::new(err))
    }
}

impl From<ActivityError> for Failure {
    fn from(err: ActivityError) -> Self {
        Failure::Activity(err)
    }
}

/// Result of decoding a boundary error
#[derive(Debug, Error)]
pub enum Decoded {
    #[error(transparent)]
    Provider(ProviderFailure),
    #[error(transparent)]
    Opaque(ActivityError),
}

impl Decoded {
    pub fn provider(&self) -> Option<&ProviderFailure> {
        match self {
            Decoded::Provider(failure) => Some(failure),
            Decoded::Opaque(_) => None,
        }
    }

    /// Provider error code, when the error came from a provider
    pub fn code(&self) -> Option<&str> {
        self.provider().map(|failure| failure.code())
    }
}

/// Encode an activity failure for transport across the boundary
///
/// Provider errors are tagged `PROVIDER_<code>` with a [`PortableError`]
/// payload. Boundary errors pass through untouched.
pub fn encode(err: impl Into<Failure>) -> ActivityError {
    match err.into() {
        Failure::Provider(provider) => {
            let portable = PortableError::from_provider(provider.as_ref());
            let error_type = format!("{}{}", PROVIDER_PREFIX, portable.code);
            let message = portable.message.clone();
            let details = serde_json::to_value(&portable).ok();
            ActivityError {
                error_type,
                message,
                details,
                non_retryable: false,
            }
        }
        Failure::Activity(err) => err,
    }
}

/// Decode a boundary error back into a provider error where possible
///
/// Decoding is best effort: errors without the provider prefix, or whose
/// payload cannot be read, come back unchanged as [`Decoded::Opaque`].
pub fn decode(err: ActivityError) -> Decoded {
    let Some(code) = err.error_type.strip_prefix(PROVIDER_PREFIX) else {
        return Decoded::Opaque(err);
    };

    let portable = err
        .details
        .as_ref()
        .map(|details| serde_json::from_value::<PortableError>(details.clone()));

    match portable {
        Some(Ok(portable)) => {
            let code = code.to_string();
            Decoded::Provider(portable.into_failure(&code))
        }
        Some(Err(e)) => {
            tracing::debug!("Failed to decode provider error payload for {}: {}", err.error_type, e);
            Decoded::Opaque(err)
        }
        None => {
            tracing::debug!("Provider error {} carries no payload", err.error_type);
            Decoded::Opaque(err)
        }
    }
}

/// [`encode`] lifted over a result; `Ok` passes through
pub fn encode_result<T, E: Into<Failure>>(
    result: std::result::Result<T, E>,
) -> std::result::Result<T, ActivityError> {
    result.map_err(encode)
}

/// [`decode`] lifted over a result; `Ok` passes through
pub fn decode_result<T>(
    result: std::result::Result<T, ActivityError>,
) -> std::result::Result<T, Decoded> {
    result.map_err(decode)
}
