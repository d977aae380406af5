//! Vector store trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Metadata stored next to each embedded chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Milliseconds since the Unix epoch when the chunk was stored
    pub timestamp: i64,
    pub chunk_index: u64,
    /// Chunks announced for the file so far, including this batch
    pub total_chunks: u64,
    /// Remaining caller-supplied metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Optional restriction of a similarity search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match &self.file_id {
            Some(id) => metadata.file_id.as_deref() == Some(id.as_str()),
            None => true,
        }
    }
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Stores embedded chunks and answers similarity queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store one chunk. Failures are reported per call.
    async fn write(&self, content: &str, embedding: &[f32], metadata: ChunkMetadata) -> Result<()>;

    /// Up to `limit` chunks most similar to `embedding`, best first.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SimilarityHit>>;

    /// Remove every chunk belonging to `file_id`. Returns how many were removed.
    async fn delete_file(&self, file_id: &str) -> Result<usize>;
}
