//! Domain entities shared across the retrieval and reprocessing paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant workspace owning a document corpus and a vector collection.
///
/// Owned by exactly one user; deleting a bot cascades to its documents and
/// chunks (enforced by the repositories, not here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// Bot identifier (doubles as the vector collection name)
    pub id: Uuid,
    /// Owning user
    pub owner_id: Uuid,
    /// Display name
    pub name: String,
    /// Embedding provider name (openai, gemini, ...)
    pub embedding_provider: String,
    /// Embedding model name
    pub embedding_model: String,
    /// LLM provider name used for generation
    pub llm_provider: String,
    /// LLM model name used for generation
    pub llm_model: String,
}

impl Bot {
    /// Create a bot with a fresh id.
    #[must_use]
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        embedding_provider: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let embedding_provider = embedding_provider.into();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            llm_provider: embedding_provider.clone(),
            llm_model: String::new(),
            embedding_provider,
            embedding_model: embedding_model.into(),
        }
    }

    /// Override the generation provider/model pair.
    #[must_use]
    pub fn with_llm(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.llm_provider = provider.into();
        self.llm_model = model.into();
        self
    }

    /// Collection name in the vector store for a bot id.
    ///
    /// For call sites that only hold the id; with a `Bot` in scope,
    /// prefer [`Bot::collection_name`].
    #[must_use]
    pub fn collection_name_for(bot_id: Uuid) -> String {
        bot_id.to_string()
    }

    /// Collection name in the vector store (the bot id).
    #[must_use]
    pub fn collection_name(&self) -> String {
        Self::collection_name_for(self.id)
    }
}

/// A logical file attached to a bot.
///
/// `chunk_count` is the source-of-truth claim and must equal the number of
/// stored chunks for the document; the integrity checks flag any mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier
    pub id: Uuid,
    /// Owning bot
    pub bot_id: Uuid,
    /// User that uploaded the file
    pub uploader_id: Uuid,
    /// Original filename
    pub filename: String,
    /// On-disk path of the stored file
    pub file_path: String,
    /// Size in bytes
    pub file_size: u64,
    /// Declared number of chunks
    pub chunk_count: u32,
}

/// A contiguous text span of a document; the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk identifier
    pub id: Uuid,
    /// Parent document
    pub document_id: Uuid,
    /// Owning bot (denormalized for bot-wide scans)
    pub bot_id: Uuid,
    /// Position within the document, 0..n-1 contiguous
    pub chunk_index: u32,
    /// Text content
    pub content: String,
    /// Vector point id; non-empty when the chunk is indexed
    pub embedding_id: String,
}

/// Lifecycle status of a bot's vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// No live collection
    Inactive,
    /// Collection serving queries
    Active,
    /// Collection being migrated to a new embedding configuration
    Migrating,
}

/// Per-bot vector index descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Owning bot
    pub bot_id: Uuid,
    /// Collection name (equals the bot id)
    pub collection_name: String,
    /// Embedding provider the collection was built with
    pub embedding_provider: String,
    /// Embedding model the collection was built with
    pub embedding_model: String,
    /// Vector dimension of the collection
    pub embedding_dimension: usize,
    /// Lifecycle status
    pub status: CollectionStatus,
    /// Declared point count
    pub points_count: u64,
}

/// Append-only record of a single retrieval attempt, used by the threshold
/// optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdPerformanceRecord {
    /// Bot the retrieval ran against
    pub bot_id: Uuid,
    /// When the attempt happened
    pub timestamp: DateTime<Utc>,
    /// Threshold used for the attempt (0.0 when no threshold)
    pub threshold_used: f32,
    /// Embedding provider
    pub provider: String,
    /// Embedding model
    pub model: String,
    /// Length of the query text in characters
    pub query_length: usize,
    /// Privacy-preserving SHA-256 of the query text
    pub query_hash: String,
    /// Number of results the attempt returned
    pub results_found: usize,
    /// Mean similarity score of the results
    pub avg_score: Option<f32>,
    /// Highest similarity score
    pub max_score: Option<f32>,
    /// Lowest similarity score
    pub min_score: Option<f32>,
    /// Standard deviation of the scores
    pub score_std_dev: Option<f32>,
    /// Wall time of the attempt in seconds
    pub processing_time: f64,
    /// Whether the attempt produced results
    pub success: bool,
    /// Why the threshold was adjusted, when it was
    pub adjustment_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_builder() {
        let owner = Uuid::new_v4();
        let bot = Bot::new(owner, "docs-bot", "openai", "text-embedding-3-small")
            .with_llm("anthropic", "claude-3-haiku");

        assert_eq!(bot.owner_id, owner);
        assert_eq!(bot.embedding_provider, "openai");
        assert_eq!(bot.llm_provider, "anthropic");
        assert_eq!(bot.collection_name(), bot.id.to_string());
    }

    #[test]
    fn test_collection_status_serde() {
        let json = serde_json::to_string(&CollectionStatus::Migrating).unwrap();
        assert_eq!(json, "\"migrating\"");
    }
}
