//! Brute-force in-memory vector store

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use crate::vector::{
    cosine_similarity, CollectionInfo, DistanceMetric, SearchHit, VectorPoint, VectorStore,
};

#[derive(Debug)]
struct Collection {
    dimension: usize,
    distance: DistanceMetric,
    points: HashMap<String, VectorPoint>,
}

/// In-memory `VectorStore` with exact cosine scoring.
///
/// Intended for tests and single-process deployments; search is a linear
/// scan, which is fine at corpus sizes where an external index is not yet
/// warranted.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: DashMap<String, Collection>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.contains_key(collection))
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> Result<()> {
        if dimension == 0 {
            bail!("collection dimension must be non-zero");
        }
        if self.collections.contains_key(collection) {
            bail!("collection {collection} already exists");
        }
        self.collections.insert(
            collection.to_string(),
            Collection {
                dimension,
                distance,
                points: HashMap::new(),
            },
        );
        debug!("created collection {collection} (dim={dimension})");
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.collections
            .remove(collection)
            .ok_or_else(|| anyhow!("collection {collection} not found"))?;
        debug!("deleted collection {collection}");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection {collection} not found"))?;

        for point in points {
            if point.vector.len() != entry.dimension {
                bail!(
                    "point {} has dimension {}, collection {collection} expects {}",
                    point.id,
                    point.vector.len(),
                    entry.dimension
                );
            }
            entry.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection {collection} not found"))?;

        if vector.len() != entry.dimension {
            bail!(
                "query has dimension {}, collection {collection} expects {}",
                vector.len(),
                entry.dimension
            );
        }

        let mut hits: Vec<SearchHit> = entry
            .points
            .values()
            .map(|point| SearchHit {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .filter(|hit| score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        debug!(
            "search in {collection}: {} hits (top_k={top_k}, threshold={score_threshold:?})",
            hits.len()
        );
        Ok(hits)
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection {collection} not found"))?;

        Ok(CollectionInfo {
            vector_size: entry.dimension,
            distance: entry.distance,
            points_count: entry.points.len() as u64,
        })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection {collection} not found"))?;

        for id in ids {
            entry.points.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ChunkPayload;
    use uuid::Uuid;

    fn payload() -> ChunkPayload {
        ChunkPayload {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            chunk_index: 0,
            content: "text".to_string(),
        }
    }

    fn point(id: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            payload: payload(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_and_thresholds() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 2, DistanceMetric::Cosine)
            .await
            .unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("exact", vec![1.0, 0.0]),
                    point("close", vec![0.9, 0.1]),
                    point("orthogonal", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("c", &[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "close");

        let hits = store.search("c", &[1.0, 0.0], 10, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 2);

        let hits = store.search("c", &[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 3, DistanceMetric::Cosine)
            .await
            .unwrap();

        let err = store.upsert("c", vec![point("p", vec![1.0])]).await;
        assert!(err.is_err());

        let err = store.search("c", &[1.0], 5, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = MemoryVectorStore::new();
        assert!(!store.collection_exists("c").await.unwrap());

        store
            .create_collection("c", 2, DistanceMetric::Cosine)
            .await
            .unwrap();
        assert!(store.collection_exists("c").await.unwrap());
        assert!(store
            .create_collection("c", 2, DistanceMetric::Cosine)
            .await
            .is_err());

        store.upsert("c", vec![point("p", vec![1.0, 0.0])]).await.unwrap();
        let info = store.collection_info("c").await.unwrap();
        assert_eq!(info.vector_size, 2);
        assert_eq!(info.points_count, 1);

        store.delete_points("c", &["p".to_string()]).await.unwrap();
        assert_eq!(store.collection_info("c").await.unwrap().points_count, 0);

        store.delete_collection("c").await.unwrap();
        assert!(!store.collection_exists("c").await.unwrap());
    }
}
