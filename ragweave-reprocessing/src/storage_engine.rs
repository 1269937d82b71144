//! Chunk + vector write path with content deduplication
//!
//! One call stores a document's parsed chunks and their embeddings:
//! duplicate chunk texts are dropped (first occurrence wins), indexes are
//! reassigned contiguously, vector points and chunk rows are written, and
//! the document's declared chunk count is updated.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::hash::sha256_hex;
use ragweave_core::model::Chunk;
use ragweave_storage::repository::{ChunkStore, DocumentStore};
use ragweave_storage::vector::{ChunkPayload, VectorPoint, VectorStore};

use crate::processor::ParsedChunk;

/// Result of a store call.
#[derive(Debug, Clone, Copy)]
pub struct StorageOutcome {
    /// Chunks written to both stores
    pub stored_chunks: u32,
    /// Chunks dropped as duplicates
    pub deduplicated_chunks: u32,
}

/// The write path shared by ingestion and reprocessing.
pub struct ChunkStorageEngine {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    vector: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for ChunkStorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStorageEngine").finish_non_exhaustive()
    }
}

impl ChunkStorageEngine {
    /// Create the engine over the given stores.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        vector: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            documents,
            chunks,
            vector,
        }
    }

    /// Store a document's chunks and embeddings.
    ///
    /// `parsed` and `embeddings` must be the same length. With
    /// deduplication enabled, repeated chunk texts are dropped and the
    /// surviving chunks are re-indexed `0..n-1`.
    ///
    /// # Errors
    ///
    /// `Validation` on a length mismatch; `Storage` when either store
    /// rejects the write.
    pub async fn store_chunks(
        &self,
        bot_id: Uuid,
        document_id: Uuid,
        collection: &str,
        parsed: Vec<ParsedChunk>,
        embeddings: Vec<Vec<f32>>,
        enable_deduplication: bool,
    ) -> Result<StorageOutcome> {
        if parsed.len() != embeddings.len() {
            return Err(RagweaveError::Validation {
                message: format!(
                    "chunk/embedding count mismatch: {} chunks, {} embeddings",
                    parsed.len(),
                    embeddings.len()
                ),
            });
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let mut points = Vec::new();
        let mut deduplicated = 0_u32;

        for (chunk, embedding) in parsed.into_iter().zip(embeddings) {
            if enable_deduplication && !seen.insert(sha256_hex(&chunk.content)) {
                deduplicated += 1;
                continue;
            }

            let chunk_id = Uuid::new_v4();
            let embedding_id = Uuid::new_v4().to_string();
            let chunk_index = rows.len() as u32;

            points.push(VectorPoint {
                id: embedding_id.clone(),
                vector: embedding,
                payload: ChunkPayload {
                    chunk_id,
                    document_id,
                    bot_id,
                    chunk_index,
                    content: chunk.content.clone(),
                },
            });
            rows.push(Chunk {
                id: chunk_id,
                document_id,
                bot_id,
                chunk_index,
                content: chunk.content,
                embedding_id,
            });
        }

        let stored = rows.len() as u32;

        self.vector
            .upsert(collection, points)
            .await
            .map_err(RagweaveError::storage)?;
        self.chunks
            .insert_many(rows)
            .await
            .map_err(RagweaveError::storage)?;
        self.documents
            .set_chunk_count(document_id, stored)
            .await
            .map_err(RagweaveError::storage)?;

        debug!(
            "stored {stored} chunks for document {document_id} ({deduplicated} deduplicated)"
        );
        Ok(StorageOutcome {
            stored_chunks: stored,
            deduplicated_chunks: deduplicated,
        })
    }

    /// Delete a document's chunks from both stores. Returns the number
    /// of rows removed.
    ///
    /// # Errors
    ///
    /// `Storage` when either store rejects the delete.
    pub async fn delete_document_chunks(
        &self,
        document_id: Uuid,
        collection: &str,
    ) -> Result<usize> {
        let existing = self
            .chunks
            .list_for_document(document_id)
            .await
            .map_err(RagweaveError::storage)?;

        if existing.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = existing.iter().map(|c| c.embedding_id.clone()).collect();
        if let Err(err) = self.vector.delete_points(collection, &ids).await {
            // The collection may be mid-recreation; the chunk rows are
            // the source of truth for the delete
            debug!("vector point deletion failed for {document_id}: {err}");
        }

        self.chunks
            .delete_for_document(document_id)
            .await
            .map_err(RagweaveError::storage)
    }
}
