//! Server adapters: expose the relay to a UI over a network transport
//!
//! The relay itself only knows [`crate::channel`] pairs and one-shot
//! [`crate::router::RequestMessage`]s. Adapters map a framework's transport onto
//! those:
//!
//! - **Axum** (`server-adapters` feature): `GET /channel/{name}` upgrades to a
//!   WebSocket bridged to a persistent channel, `POST /message` answers one-shot
//!   requests.
//!
//! Frames are JSON text in both directions. The helpers here are
//! framework-agnostic.

use serde_json::Value;

use crate::error::{RelayError, Result};

#[cfg(feature = "server-adapters")]
pub mod axum;

/// Parse one inbound text frame. Only JSON objects are accepted.
pub fn decode_frame(text: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(text)? {
        value @ Value::Object(_) => Ok(value),
        other => Err(RelayError::InvalidMessage(format!(
            "expected a JSON object frame, got {}",
            json_kind(&other)
        ))),
    }
}

/// Serialize one outbound message as a text frame.
pub fn encode_frame(message: &Value) -> String {
    message.to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
