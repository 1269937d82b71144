//! Vector store capability trait and types

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Distance metric for a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity (the default for every supported provider)
    #[default]
    Cosine,
    /// Dot product
    Dot,
    /// Euclidean distance
    Euclidean,
}

/// Payload carried by every vector point alongside its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Chunk row id
    pub chunk_id: Uuid,
    /// Parent document
    pub document_id: Uuid,
    /// Owning bot
    pub bot_id: Uuid,
    /// Position within the document
    pub chunk_index: u32,
    /// Chunk text
    pub content: String,
}

/// A point to upsert into a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point id (the chunk's embedding id)
    pub id: String,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Chunk payload
    pub payload: ChunkPayload,
}

/// A search result from a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Point id
    pub id: String,
    /// Similarity score (higher is better)
    pub score: f32,
    /// Chunk payload
    pub payload: ChunkPayload,
}

/// Collection configuration and size, as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Declared vector dimension
    pub vector_size: usize,
    /// Distance metric
    pub distance: DistanceMetric,
    /// Number of live points
    pub points_count: u64,
}

/// Pluggable vector-index capability.
///
/// One collection per bot, keyed by the bot id. The core assumes nothing
/// about the backend beyond per-point atomicity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether the collection exists.
    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Create a collection with the given dimension and metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection already exists or the backend is
    /// unavailable.
    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> Result<()>;

    /// Delete a collection and all its points.
    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Insert or replace points.
    ///
    /// # Errors
    ///
    /// Returns an error if a point's dimension does not match the
    /// collection or the collection does not exist.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Similarity search, optionally filtered by a minimum score.
    ///
    /// Results are ordered by descending score and truncated to `top_k`.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    /// Collection configuration and live point count.
    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo>;

    /// Delete points by id. Missing ids are ignored.
    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()>;
}

/// Cosine similarity between two vectors.
///
/// Shorter vector decides the overlap; zero-norm inputs score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for i in 0..a.len().min(b.len()) {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
