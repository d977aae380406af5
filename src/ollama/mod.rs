//! Ollama backend
//!
//! REST client, wire types, and the embedding generator built on it.

pub mod client;
pub mod embeddings;
pub mod types;

pub use client::{OllamaClient, classify_http_error, validate_model_name};
pub use embeddings::OllamaEmbeddingGenerator;
pub use types::*;
