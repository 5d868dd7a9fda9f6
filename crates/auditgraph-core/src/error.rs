//! Centralized error types for the sync engine core.

use thiserror::Error;

use crate::event::EventType;

/// Main error type for core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Malformed payload for '{event_type}': {source}")]
    MalformedPayload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
