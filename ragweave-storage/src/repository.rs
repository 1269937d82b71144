//! Repository ports for the relational entities the core depends on
//!
//! The relational store itself is out of scope; these traits define
//! exactly the access paths the retrieval and reprocessing components
//! need. The in-memory implementations in [`crate::memory`] satisfy them
//! for tests and single-process deployments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragweave_core::model::{Bot, Chunk, CollectionMetadata, Document, ThresholdPerformanceRecord};
use uuid::Uuid;

/// Access to bots.
#[async_trait]
pub trait BotStore: Send + Sync {
    /// Fetch a bot by id.
    async fn get(&self, id: Uuid) -> Result<Option<Bot>>;

    /// Insert or replace a bot.
    async fn upsert(&self, bot: Bot) -> Result<()>;
}

/// Access to documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    /// All documents belonging to a bot.
    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<Document>>;

    /// Number of documents belonging to a bot.
    async fn count_for_bot(&self, bot_id: Uuid) -> Result<usize>;

    /// Insert or replace a document.
    async fn upsert(&self, document: Document) -> Result<()>;

    /// Update a document's declared chunk count.
    async fn set_chunk_count(&self, id: Uuid, chunk_count: u32) -> Result<()>;
}

/// Access to document chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Chunks of a document, ordered by chunk index.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// All chunks belonging to a bot.
    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<Chunk>>;

    /// Number of chunks belonging to a bot.
    async fn count_for_bot(&self, bot_id: Uuid) -> Result<usize>;

    /// Number of chunks belonging to a document.
    async fn count_for_document(&self, document_id: Uuid) -> Result<usize>;

    /// Insert chunks.
    async fn insert_many(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Delete a document's chunks, returning the count removed.
    async fn delete_for_document(&self, document_id: Uuid) -> Result<usize>;

    /// Delete a bot's chunks, returning the count removed.
    async fn delete_for_bot(&self, bot_id: Uuid) -> Result<usize>;
}

/// Access to per-bot collection metadata.
#[async_trait]
pub trait CollectionMetadataStore: Send + Sync {
    /// Fetch the descriptor for a bot's collection.
    async fn get(&self, bot_id: Uuid) -> Result<Option<CollectionMetadata>>;

    /// Insert or replace the descriptor.
    async fn upsert(&self, metadata: CollectionMetadata) -> Result<()>;
}

/// Append-only threshold performance log.
#[async_trait]
pub trait PerformanceLogStore: Send + Sync {
    /// Append one retrieval-attempt record.
    async fn append(&self, record: ThresholdPerformanceRecord) -> Result<()>;

    /// Records for a bot since `since`, newest first.
    async fn list_since(
        &self,
        bot_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ThresholdPerformanceRecord>>;
}

/// Access to user-stored provider API keys.
#[async_trait]
pub trait UserKeyStore: Send + Sync {
    /// The user's stored key for a provider, if any.
    async fn get_key(&self, user_id: Uuid, provider: &str) -> Result<Option<String>>;

    /// Store or replace a user's key for a provider.
    async fn set_key(&self, user_id: Uuid, provider: &str, api_key: &str) -> Result<()>;
}
