//! Checksum-bearing snapshots of a bot's data state
//!
//! Captured before destructive operations and referenced by rollback
//! plans. Snapshots persist as one JSON file each under
//! `{data_dir}/snapshots/` and are cached in memory behind a single
//! mutex; retention is time-based.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::hash::sha256_hex;
use ragweave_core::model::CollectionMetadata;
use ragweave_storage::repository::{
    BotStore, ChunkStore, CollectionMetadataStore, DocumentStore,
};
use ragweave_storage::vector::VectorStore;

/// Chunk checksums are sampled; corpora beyond this size are covered
/// probabilistically.
const CHUNK_CHECKSUM_SAMPLE: usize = 1000;

/// Immutable record of a bot's data state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier
    pub snapshot_id: String,
    /// Bot the snapshot covers
    pub bot_id: Uuid,
    /// Unix seconds at creation
    pub created_at: f64,
    /// Documents at capture time
    pub document_count: usize,
    /// Chunks at capture time
    pub chunk_count: usize,
    /// Vector points at capture time (0 when the store was unreachable)
    pub vector_count: u64,
    /// Collection descriptor at capture time
    pub collection_config: Option<CollectionMetadata>,
    /// Full map of document id to checksum
    pub document_checksums: HashMap<String, String>,
    /// Sampled map of chunk id to checksum
    pub chunk_checksums: HashMap<String, String>,
    /// Wall time the capture took in seconds
    pub creation_duration: f64,
}

/// Checksum over the fields a document's integrity claim rests on.
#[must_use]
pub fn document_checksum(id: Uuid, filename: &str, file_size: u64, chunk_count: u32) -> String {
    sha256_hex(&format!("{id}|{filename}|{file_size}|{chunk_count}"))
}

/// Checksum over a chunk's structural identity.
#[must_use]
pub fn chunk_checksum(id: Uuid, document_id: Uuid, chunk_index: u32, content_len: usize) -> String {
    sha256_hex(&format!("{id}|{document_id}|{chunk_index}|{content_len}"))
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Snapshot creation, persistence and retention.
pub struct SnapshotService {
    bots: Arc<dyn BotStore>,
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    collections: Arc<dyn CollectionMetadataStore>,
    vector: Arc<dyn VectorStore>,
    dir: PathBuf,
    memory: Mutex<HashMap<String, Snapshot>>,
    retention_days: i64,
}

impl std::fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotService")
            .field("dir", &self.dir)
            .field("cached", &self.memory.lock().len())
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

impl SnapshotService {
    /// Create a service persisting snapshots under `data_dir/snapshots`.
    #[must_use]
    pub fn new(
        bots: Arc<dyn BotStore>,
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        collections: Arc<dyn CollectionMetadataStore>,
        vector: Arc<dyn VectorStore>,
        data_dir: PathBuf,
        retention_days: i64,
    ) -> Self {
        Self {
            bots,
            documents,
            chunks,
            collections,
            vector,
            dir: data_dir.join("snapshots"),
            memory: Mutex::new(HashMap::new()),
            retention_days,
        }
    }

    fn path_for(&self, snapshot_id: &str) -> PathBuf {
        self.dir.join(format!("{snapshot_id}.json"))
    }

    /// Capture a snapshot of the bot's current state.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist; `Storage` when repository
    /// reads or the snapshot write fail. A vector store that cannot be
    /// reached is tolerated (the vector count records as 0).
    pub async fn create_snapshot(
        &self,
        bot_id: Uuid,
        snapshot_id: Option<String>,
    ) -> Result<Snapshot> {
        let start = std::time::Instant::now();
        let snapshot_id = snapshot_id
            .unwrap_or_else(|| format!("snapshot_{bot_id}_{}", now_epoch() as u64));

        info!("creating data snapshot {snapshot_id} for bot {bot_id}");

        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        let collection_config = self
            .collections
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?;

        let documents = self
            .documents
            .list_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;
        let chunks = self
            .chunks
            .list_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;

        let vector_count = match self.vector.collection_info(&bot.collection_name()).await {
            Ok(info) => info.points_count,
            Err(err) => {
                warn!("failed to get vector count for snapshot: {err}");
                0
            }
        };

        let document_checksums: HashMap<String, String> = documents
            .iter()
            .map(|d| {
                (
                    d.id.to_string(),
                    document_checksum(d.id, &d.filename, d.file_size, d.chunk_count),
                )
            })
            .collect();

        let chunk_checksums: HashMap<String, String> = chunks
            .iter()
            .take(CHUNK_CHECKSUM_SAMPLE)
            .map(|c| {
                (
                    c.id.to_string(),
                    chunk_checksum(c.id, c.document_id, c.chunk_index, c.content.len()),
                )
            })
            .collect();

        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            bot_id,
            created_at: now_epoch(),
            document_count: documents.len(),
            chunk_count: chunks.len(),
            vector_count,
            collection_config,
            document_checksums,
            chunk_checksums,
            creation_duration: start.elapsed().as_secs_f64(),
        };

        self.store(&snapshot).await?;
        info!("data snapshot {snapshot_id} created");
        Ok(snapshot)
    }

    async fn store(&self, snapshot: &Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(RagweaveError::storage)?;

        let serialized = serde_json::to_vec_pretty(snapshot).map_err(RagweaveError::storage)?;
        tokio::fs::write(self.path_for(&snapshot.snapshot_id), serialized)
            .await
            .map_err(RagweaveError::storage)?;

        self.memory
            .lock()
            .insert(snapshot.snapshot_id.clone(), snapshot.clone());
        debug!("snapshot {} stored", snapshot.snapshot_id);
        Ok(())
    }

    /// Load a snapshot, preferring the in-memory cache.
    pub async fn load(&self, snapshot_id: &str) -> Option<Snapshot> {
        if let Some(snapshot) = self.memory.lock().get(snapshot_id) {
            return Some(snapshot.clone());
        }

        let path = self.path_for(snapshot_id);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                self.memory
                    .lock()
                    .insert(snapshot_id.to_string(), snapshot.clone());
                Some(snapshot)
            }
            Err(err) => {
                warn!("failed to parse snapshot {snapshot_id}: {err}");
                None
            }
        }
    }

    /// Snapshots in memory, optionally filtered by bot, newest first.
    #[must_use]
    pub fn list(&self, bot_id: Option<Uuid>) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self
            .memory
            .lock()
            .values()
            .filter(|s| bot_id.is_none() || bot_id == Some(s.bot_id))
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| {
            b.created_at
                .partial_cmp(&a.created_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        snapshots
    }

    /// Delete a snapshot from both tiers.
    pub async fn delete(&self, snapshot_id: &str) {
        self.memory.lock().remove(snapshot_id);
        let path = self.path_for(snapshot_id);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove snapshot file {path:?}: {err}");
            }
        }
    }

    /// Purge snapshots older than the retention window. Returns the
    /// number removed.
    pub async fn cleanup_old_snapshots(&self, retention_days: Option<i64>) -> usize {
        let retention_days = retention_days.unwrap_or(self.retention_days);
        let cutoff = now_epoch() - (retention_days as f64) * 24.0 * 60.0 * 60.0;

        let stale: Vec<String> = self
            .memory
            .lock()
            .values()
            .filter(|s| s.created_at < cutoff)
            .map(|s| s.snapshot_id.clone())
            .collect();

        for snapshot_id in &stale {
            self.delete(snapshot_id).await;
            info!("cleaned up old snapshot {snapshot_id}");
        }
        stale.len()
    }
}
