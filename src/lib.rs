//! # siumai-relay
//!
//! Streaming relay between a local Ollama server and a UI.
//!
//! The relay keeps long-lived streams flowing from Ollama's NDJSON endpoints
//! to UI channels while letting either side walk away at any moment:
//!
//! - **Chat**: `/api/chat` deltas, done record with metrics, abort on demand
//! - **Model pull**: `/api/pull` progress as percentages, cancellable per model
//! - **Embedding batches**: chunks embedded and written to a vector store,
//!   cancellable between writes
//! - **One-shot requests**: model listing, settings, similarity search
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use siumai_relay::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::new(RelayConfig::from_env()?)?;
//!
//!     let (local, mut ui) = channel("chat");
//!     relay.connect(local);
//!     ui.post_message(json!({"messages": [{"role": "user", "content": "Hello"}]}))?;
//!     while let Some(event) = ui.recv().await {
//!         if let Some(delta) = event["delta"].as_str() {
//!             print!("{delta}");
//!         }
//!         if event["done"] == true || event.get("error").is_some() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod ollama;
pub mod router;
pub mod server_adapters;
pub mod storage;
pub mod streaming;
pub mod telemetry;
pub mod traits;
pub mod utils;

pub use error::{RelayError, Result};

pub mod prelude {
    pub use crate::channel::{MessageSink, RelayChannel, RemoteChannel, Responder, channel};
    pub use crate::config::RelayConfig;
    pub use crate::error::{RelayError, Result};
    pub use crate::ollama::{OllamaClient, OllamaEmbeddingGenerator};
    pub use crate::router::{Relay, RequestMessage};
    pub use crate::storage::{InMemoryVectorStore, JsonFileSettingsStore, MemorySettingsStore};
    pub use crate::traits::{EmbeddingGenerator, EmbeddingResult, SettingsStore, VectorStore};
    pub use crate::utils::{CHAT_KEY, CancellationRegistry, pull_key};
}
