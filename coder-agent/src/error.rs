// ABOUTME: Typed error taxonomy for coder adapters, the registry and the run driver.
// ABOUTME: Maps each error class onto the wire-level ErrorCode.

use crate::event::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoderError>;

#[derive(Debug, Error)]
pub enum CoderError {
    /// Bad option or adapter configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Registry lookup for an unknown coder name
    #[error("No adapter registered under '{0}'")]
    NotRegistered(String),

    /// Backend process could not be started
    #[error("{provider} backend unavailable: {message}")]
    BackendUnavailable { provider: String, message: String },

    /// Backend no longer knows the requested conversation
    #[error("Thread not found: {0}")]
    NotFound(String),

    /// Backend reported a fatal error
    #[error("Backend error ({code}): {message}")]
    Backend { code: ErrorCode, message: String },

    /// Run was cancelled
    #[error("Run interrupted: {0}")]
    Interrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoderError::Configuration(_) | CoderError::NotRegistered(_) => {
                ErrorCode::Configuration
            }
            CoderError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            CoderError::NotFound(_) => ErrorCode::NotFound,
            CoderError::Backend { code, .. } => code.clone(),
            CoderError::Interrupted(_) => ErrorCode::Interrupted,
            CoderError::Io(_) => ErrorCode::BackendError,
        }
    }

    /// Configuration-class errors are surfaced synchronously and never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoderError::Configuration(_) | CoderError::NotRegistered(_)
        )
    }

    /// Rebuild an error from a terminal error event
    pub fn from_event(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Interrupted => CoderError::Interrupted(message),
            ErrorCode::NotFound => CoderError::NotFound(message),
            code => CoderError::Backend { code, message },
        }
    }
}

impl From<serde_json::Error> for CoderError {
    fn from(e: serde_json::Error) -> Self {
        CoderError::Configuration(e.to_string())
    }
}
