//! In-memory repository implementations

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use ragweave_core::model::{Bot, Chunk, CollectionMetadata, Document, ThresholdPerformanceRecord};

use crate::repository::{
    BotStore, ChunkStore, CollectionMetadataStore, DocumentStore, PerformanceLogStore,
    UserKeyStore,
};

/// In-memory `BotStore`.
#[derive(Debug, Default)]
pub struct MemoryBotStore {
    bots: RwLock<HashMap<Uuid, Bot>>,
}

impl MemoryBotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BotStore for MemoryBotStore {
    async fn get(&self, id: Uuid) -> Result<Option<Bot>> {
        Ok(self.bots.read().get(&id).cloned())
    }

    async fn upsert(&self, bot: Bot) -> Result<()> {
        self.bots.write().insert(bot.id, bot);
        Ok(())
    }
}

/// In-memory `DocumentStore`.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().get(&id).cloned())
    }

    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .values()
            .filter(|d| d.bot_id == bot_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn count_for_bot(&self, bot_id: Uuid) -> Result<usize> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|d| d.bot_id == bot_id)
            .count())
    }

    async fn upsert(&self, document: Document) -> Result<()> {
        self.documents.write().insert(document.id, document);
        Ok(())
    }

    async fn set_chunk_count(&self, id: Uuid, chunk_count: u32) -> Result<()> {
        if let Some(doc) = self.documents.write().get_mut(&id) {
            doc.chunk_count = chunk_count;
        }
        Ok(())
    }
}

/// In-memory `ChunkStore`.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<Uuid, Chunk>>,
}

impl MemoryChunkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .chunks
            .read()
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .read()
            .values()
            .filter(|c| c.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn count_for_bot(&self, bot_id: Uuid) -> Result<usize> {
        Ok(self
            .chunks
            .read()
            .values()
            .filter(|c| c.bot_id == bot_id)
            .count())
    }

    async fn count_for_document(&self, document_id: Uuid) -> Result<usize> {
        Ok(self
            .chunks
            .read()
            .values()
            .filter(|c| c.document_id == document_id)
            .count())
    }

    async fn insert_many(&self, chunks: Vec<Chunk>) -> Result<()> {
        let mut map = self.chunks.write();
        for chunk in chunks {
            map.insert(chunk.id, chunk);
        }
        Ok(())
    }

    async fn delete_for_document(&self, document_id: Uuid) -> Result<usize> {
        let mut map = self.chunks.write();
        let before = map.len();
        map.retain(|_, c| c.document_id != document_id);
        Ok(before - map.len())
    }

    async fn delete_for_bot(&self, bot_id: Uuid) -> Result<usize> {
        let mut map = self.chunks.write();
        let before = map.len();
        map.retain(|_, c| c.bot_id != bot_id);
        Ok(before - map.len())
    }
}

/// In-memory `CollectionMetadataStore`.
#[derive(Debug, Default)]
pub struct MemoryCollectionMetadataStore {
    metadata: RwLock<HashMap<Uuid, CollectionMetadata>>,
}

impl MemoryCollectionMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionMetadataStore for MemoryCollectionMetadataStore {
    async fn get(&self, bot_id: Uuid) -> Result<Option<CollectionMetadata>> {
        Ok(self.metadata.read().get(&bot_id).cloned())
    }

    async fn upsert(&self, metadata: CollectionMetadata) -> Result<()> {
        self.metadata.write().insert(metadata.bot_id, metadata);
        Ok(())
    }
}

/// In-memory append-only `PerformanceLogStore`.
#[derive(Debug, Default)]
pub struct MemoryPerformanceLogStore {
    records: RwLock<Vec<ThresholdPerformanceRecord>>,
}

impl MemoryPerformanceLogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record appended so far, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<ThresholdPerformanceRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl PerformanceLogStore for MemoryPerformanceLogStore {
    async fn append(&self, record: ThresholdPerformanceRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn list_since(
        &self,
        bot_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ThresholdPerformanceRecord>> {
        let mut records: Vec<ThresholdPerformanceRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.bot_id == bot_id && r.timestamp >= since)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

/// In-memory `UserKeyStore`.
#[derive(Debug, Default)]
pub struct MemoryUserKeyStore {
    keys: RwLock<HashMap<(Uuid, String), String>>,
}

impl MemoryUserKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserKeyStore for MemoryUserKeyStore {
    async fn get_key(&self, user_id: Uuid, provider: &str) -> Result<Option<String>> {
        Ok(self
            .keys
            .read()
            .get(&(user_id, provider.to_string()))
            .cloned())
    }

    async fn set_key(&self, user_id: Uuid, provider: &str, api_key: &str) -> Result<()> {
        self.keys
            .write()
            .insert((user_id, provider.to_string()), api_key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bot_id: Uuid, document_id: Uuid, index: u32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            bot_id,
            chunk_index: index,
            content: format!("chunk {index}"),
            embedding_id: Uuid::new_v4().to_string(),
        }
    }

    #[tokio::test]
    async fn test_chunk_store_cascade_paths() {
        let store = MemoryChunkStore::new();
        let bot = Uuid::new_v4();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        store
            .insert_many(vec![
                chunk(bot, doc_a, 1),
                chunk(bot, doc_a, 0),
                chunk(bot, doc_b, 0),
            ])
            .await
            .unwrap();

        let ordered = store.list_for_document(doc_a).await.unwrap();
        assert_eq!(
            ordered.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1]
        );

        assert_eq!(store.count_for_bot(bot).await.unwrap(), 3);
        assert_eq!(store.delete_for_document(doc_a).await.unwrap(), 2);
        assert_eq!(store.count_for_bot(bot).await.unwrap(), 1);
        assert_eq!(store.delete_for_bot(bot).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_performance_log_window() {
        let store = MemoryPerformanceLogStore::new();
        let bot = Uuid::new_v4();
        let now = Utc::now();

        for (offset_days, threshold) in [(10, 0.7), (1, 0.5), (0, 0.3)] {
            store
                .append(ThresholdPerformanceRecord {
                    bot_id: bot,
                    timestamp: now - chrono::Duration::days(offset_days),
                    threshold_used: threshold,
                    provider: "openai".to_string(),
                    model: "text-embedding-3-small".to_string(),
                    query_length: 5,
                    query_hash: String::new(),
                    results_found: 1,
                    avg_score: Some(0.8),
                    max_score: Some(0.8),
                    min_score: Some(0.8),
                    score_std_dev: Some(0.0),
                    processing_time: 0.1,
                    success: true,
                    adjustment_reason: None,
                })
                .await
                .unwrap();
        }

        let window = store
            .list_since(bot, now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        // Newest first
        assert!(window[0].timestamp >= window[1].timestamp);
    }
}
