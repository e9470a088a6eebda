//! Provider error capability
//!
//! Cloud SDK adapters expose their structured errors through
//! [`ProviderError`]. Only errors with this capability are encoded
//! losslessly across the activity boundary; everything else is opaque.

use std::error::Error;
use std::fmt;

/// Code of the "resource not ready yet" sentinel
///
/// A poll returning a provider error with this code means "keep polling";
/// every other error is fatal to a [`Waiter`](crate::Waiter).
pub const NOT_READY_CODE: &str = "ResourceNotReady";

/// Structured provider error: a code, a human message and an optional cause
pub trait ProviderError: Error + Send + Sync {
    /// Provider error code (e.g. "ResourceNotFound", "Throttling")
    fn code(&self) -> &str;

    /// Human readable message without the code
    fn message(&self) -> String;

    /// Wrapped lower-level error, if any
    fn original_error(&self) -> Option<&(dyn Error + 'static)> {
        self.source()
    }

    /// Whether this is the "not ready yet" sentinel
    fn is_not_ready(&self) -> bool {
        self.code() == NOT_READY_CODE
    }
}

/// Provider error reconstructed on the caller side of the activity boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    code: String,
    message: String,
    cause: Option<OriginalError>,
}

impl ProviderFailure {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        cause: Option<OriginalError>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            cause,
        }
    }

    /// The cause as reconstructed from its text, if there was one
    pub fn cause(&self) -> Option<&OriginalError> {
        self.cause.as_ref()
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {}", cause)?;
        }
        Ok(())
    }
}

impl Error for ProviderFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| c as &(dyn Error + 'static))
    }
}

impl ProviderError for ProviderFailure {
    fn code(&self) -> &str {
        &self.code
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

/// Plain error carrying only the text of a provider error's original cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalError(pub String);

impl fmt::Display for OriginalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for OriginalError {}
