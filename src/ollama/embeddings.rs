//! Ollama Embeddings Implementation
//!
//! Embedding generator backed by `POST /api/embed`.
//!
//! # API Reference
//! <https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings>

use async_trait::async_trait;

use super::client::OllamaClient;
use crate::error::{RelayError, Result};
use crate::traits::{EmbeddingGenerator, EmbeddingResult};

/// Embedding generator that talks to Ollama.
///
/// A failed batch call is retried one text at a time so a single bad input
/// yields one error item instead of failing the whole batch. Connection and
/// timeout failures are returned as-is since per-item retries cannot succeed.
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingGenerator {
    client: OllamaClient,
    default_model: String,
}

impl OllamaEmbeddingGenerator {
    pub fn new(client: OllamaClient, default_model: impl Into<String>) -> Self {
        Self {
            client,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn embed_one(&self, model: &str, text: &str) -> EmbeddingResult {
        match self.client.embed(model, &[text.to_string()]).await {
            Ok(response) => match response.embeddings.into_iter().next() {
                Some(embedding) if !embedding.is_empty() => EmbeddingResult::Success {
                    embedding,
                    model: response.model.unwrap_or_else(|| model.to_string()),
                },
                _ => EmbeddingResult::Failure {
                    error: "empty embedding returned".to_string(),
                },
            },
            Err(e) => EmbeddingResult::Failure {
                error: e.user_message(),
            },
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for OllamaEmbeddingGenerator {
    async fn generate_batch(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<EmbeddingResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = model.unwrap_or(&self.default_model);

        match self.client.embed(model, texts).await {
            Ok(response) => {
                let response_model = response.model.unwrap_or_else(|| model.to_string());
                let mut embeddings = response.embeddings.into_iter();
                Ok((0..texts.len())
                    .map(|_| match embeddings.next() {
                        Some(embedding) if !embedding.is_empty() => EmbeddingResult::Success {
                            embedding,
                            model: response_model.clone(),
                        },
                        _ => EmbeddingResult::Failure {
                            error: "missing embedding in batch response".to_string(),
                        },
                    })
                    .collect())
            }
            Err(e @ (RelayError::ConnectionError(_) | RelayError::TimeoutError(_))) => Err(e),
            Err(e) => {
                tracing::warn!(model, error = %e, count = texts.len(), "batch embedding failed, retrying per item");
                let mut results = Vec::with_capacity(texts.len());
                for text in texts {
                    results.push(self.embed_one(model, text).await);
                }
                Ok(results)
            }
        }
    }
}
