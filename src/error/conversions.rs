//! Conversions from common error types into `RelayError`

use super::types::RelayError;

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return RelayError::TimeoutError(format!("Request timed out: {e}"));
        }
        if e.is_connect() {
            return RelayError::ConnectionError(format!("Connection error: {e}"));
        }
        if let Some(status) = e.status() {
            return RelayError::api_error(status.as_u16(), e.to_string());
        }
        RelayError::HttpError(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::JsonError(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::IoError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            RelayError::Cancelled("task aborted".to_string())
        } else {
            RelayError::InternalError(format!("task panicked: {e}"))
        }
    }
}
