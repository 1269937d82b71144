//! Durable checkpoints for resuming interrupted reprocessing runs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::ReprocessingPhase;

/// Snapshot of an operation's progress, written every few batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Operation the checkpoint belongs to
    pub operation_id: String,
    /// Bot being reprocessed
    pub bot_id: Uuid,
    /// Phase at checkpoint time
    pub phase: ReprocessingPhase,
    /// Documents processed successfully so far
    pub processed_documents: Vec<Uuid>,
    /// Documents that failed so far
    pub failed_documents: Vec<Uuid>,
    /// Batch the operation was in
    pub current_batch: usize,
    /// Total batches in the operation
    pub total_batches: usize,
    /// Whether the backup phase completed
    pub backup_created: bool,
    /// Unix seconds at write time
    pub created_at: f64,
}

/// File-per-operation checkpoint persistence under
/// `{data_dir}/checkpoints/`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join("checkpoints"),
        }
    }

    fn path_for(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }

    /// Persist a checkpoint, replacing any previous one for the
    /// operation. Failures are logged, not surfaced: a missed checkpoint
    /// must never fail the operation itself.
    pub async fn save(&self, checkpoint: &Checkpoint) {
        let result: anyhow::Result<()> = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let serialized = serde_json::to_vec_pretty(checkpoint)?;
            tokio::fs::write(self.path_for(&checkpoint.operation_id), serialized).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => debug!(
                "checkpoint saved for {} at batch {}",
                checkpoint.operation_id, checkpoint.current_batch
            ),
            Err(err) => warn!(
                "failed to save checkpoint for {}: {err}",
                checkpoint.operation_id
            ),
        }
    }

    /// Load the checkpoint for an operation, if one exists.
    pub async fn load(&self, operation_id: &str) -> Option<Checkpoint> {
        let bytes = tokio::fs::read(self.path_for(operation_id)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Some(checkpoint),
            Err(err) => {
                warn!("failed to parse checkpoint for {operation_id}: {err}");
                None
            }
        }
    }

    /// Remove the checkpoint for an operation.
    pub async fn delete(&self, operation_id: &str) {
        let path = self.path_for(operation_id);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove checkpoint {path:?}: {err}");
            }
        }
    }
}

/// Current unix time in seconds, as stored in checkpoints.
#[must_use]
pub fn checkpoint_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_delete_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().to_path_buf());

        let checkpoint = Checkpoint {
            operation_id: "op-1".to_string(),
            bot_id: Uuid::new_v4(),
            phase: ReprocessingPhase::Processing,
            processed_documents: vec![Uuid::new_v4()],
            failed_documents: vec![],
            current_batch: 5,
            total_batches: 10,
            backup_created: true,
            created_at: checkpoint_timestamp(),
        };

        store.save(&checkpoint).await;
        let loaded = store.load("op-1").await.expect("checkpoint exists");
        assert_eq!(loaded.current_batch, 5);
        assert_eq!(loaded.processed_documents, checkpoint.processed_documents);
        assert!(loaded.backup_created);

        store.delete("op-1").await;
        assert!(store.load("op-1").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().to_path_buf());
        assert!(store.load("nope").await.is_none());
    }
}
