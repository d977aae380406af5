//! Error Handling Module
//!
//! This module provides error handling for the relay, including:
//! - The core error type (`RelayError`)
//! - Wire-shape helpers used when an error is relayed to a UI channel
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use siumai_relay::error::RelayError;
//!
//! let error = RelayError::api_error(404, "model 'x' not found");
//! assert_eq!(error.status_code(), Some(404));
//! assert!(!error.is_disconnect());
//! ```

// Module declarations
mod conversions;
pub mod types;

// Re-exports for public API
pub use types::*;
