//! In-memory vector store
//!
//! Linear-scan cosine similarity over chunks kept in memory. Used by tests and
//! the standalone server when no external index is wired in.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RelayError, Result};
use crate::traits::{ChunkMetadata, SearchFilter, SimilarityHit, VectorStore};

#[derive(Debug, Clone)]
struct StoredChunk {
    content: String,
    embedding: Vec<f32>,
    norm: f32,
    metadata: ChunkMetadata,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn write(&self, content: &str, embedding: &[f32], metadata: ChunkMetadata) -> Result<()> {
        if embedding.is_empty() {
            return Err(RelayError::StorageError("embedding is empty".to_string()));
        }
        let mut chunks = self.chunks.write().await;
        if let Some(first) = chunks.first()
            && first.embedding.len() != embedding.len()
        {
            return Err(RelayError::StorageError(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                first.embedding.len()
            )));
        }
        chunks.push(StoredChunk {
            content: content.to_string(),
            embedding: embedding.to_vec(),
            norm: norm(embedding),
            metadata,
        });
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SimilarityHit>> {
        let query_norm = norm(embedding);
        let chunks = self.chunks.read().await;
        let mut hits: Vec<SimilarityHit> = chunks
            .iter()
            .filter(|c| c.embedding.len() == embedding.len())
            .filter(|c| filter.is_none_or(|f| f.matches(&c.metadata)))
            .map(|c| SimilarityHit {
                content: c.content.clone(),
                score: cosine(embedding, query_norm, &c.embedding, c.norm),
                metadata: c.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_file(&self, file_id: &str) -> Result<usize> {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|c| c.metadata.file_id.as_deref() != Some(file_id));
        Ok(before - chunks.len())
    }
}
