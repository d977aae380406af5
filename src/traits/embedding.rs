//! Embedding generator trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Outcome for one input of a batch embedding call.
///
/// Batches can partially fail, so every item is either a vector or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingResult {
    Success { embedding: Vec<f32>, model: String },
    Failure { error: String },
}

impl EmbeddingResult {
    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Self::Success { embedding, .. } => Some(embedding),
            Self::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Embed `texts`, returning exactly one result per input, in order.
    ///
    /// An `Err` means the call as a whole failed; per-item failures are
    /// reported as [`EmbeddingResult::Failure`].
    async fn generate_batch(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<EmbeddingResult>>;

    /// Embed a single text.
    async fn generate(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>> {
        let results = self.generate_batch(&[text.to_string()], model).await?;
        match results.into_iter().next() {
            Some(EmbeddingResult::Success { embedding, .. }) => Ok(embedding),
            Some(EmbeddingResult::Failure { error }) => Err(RelayError::EmbeddingError(error)),
            None => Err(RelayError::EmbeddingError(
                "embedding generator returned no result".to_string(),
            )),
        }
    }
}
