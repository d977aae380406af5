//! Core error types

use serde_json::{Value, json};
use thiserror::Error;

/// Status used on the wire for errors reported inside an otherwise successful stream.
pub const UPSTREAM_ERROR_STATUS: u16 = 500;

/// Status used on the wire when the backend could not be reached at all.
pub const UNREACHABLE_STATUS: u16 = 0;

/// Errors produced by the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Generic HTTP failure (request could not be sent or body could not be read)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Backend could not be reached
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Request timed out
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Backend answered with a non-success status
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<Value>,
    },

    /// A response or frame could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Filesystem failure (settings file, log file)
    #[error("IO error: {0}")]
    IoError(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The remote end of a channel is gone
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    /// Operation was cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Vector store or settings store failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Inbound message did not match any known shape
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Build an API error from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// HTTP-like status code associated with this error, when one is known.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            Self::ConnectionError(_) => Some(UNREACHABLE_STATUS),
            Self::TimeoutError(_) => Some(408),
            Self::InvalidMessage(_) | Self::ConfigurationError(_) => Some(400),
            _ => None,
        }
    }

    /// Whether this error means the remote end of a channel went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }

    /// Message suitable for showing to a user, without the variant prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::ApiError { message, .. } => message.clone(),
            Self::HttpError(m)
            | Self::ConnectionError(m)
            | Self::TimeoutError(m)
            | Self::ParseError(m)
            | Self::JsonError(m)
            | Self::IoError(m)
            | Self::ConfigurationError(m)
            | Self::Disconnected(m)
            | Self::Cancelled(m)
            | Self::EmbeddingError(m)
            | Self::StorageError(m)
            | Self::InvalidMessage(m)
            | Self::InternalError(m) => m.clone(),
        }
    }

    /// The `{status, message}` object the UI expects for chat and one-shot errors.
    pub fn to_wire(&self) -> Value {
        json!({
            "status": self.status_code().unwrap_or(UPSTREAM_ERROR_STATUS),
            "message": self.user_message(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_keeps_status_and_message() {
        let err = RelayError::api_error(404, "model 'missing' not found");
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(
            err.to_wire(),
            json!({"status": 404, "message": "model 'missing' not found"})
        );
    }

    #[test]
    fn unknown_status_defaults_to_upstream_error() {
        let err = RelayError::ParseError("bad frame".into());
        assert_eq!(err.to_wire()["status"], 500);
        assert_eq!(err.to_wire()["message"], "bad frame");
    }

    #[test]
    fn connection_errors_report_unreachable() {
        let err = RelayError::ConnectionError("refused".into());
        assert_eq!(err.status_code(), Some(UNREACHABLE_STATUS));
        assert!(!err.is_disconnect());
        assert!(RelayError::Disconnected("ui".into()).is_disconnect());
    }
}
