//! Planned, recoverable rollback to a data snapshot
//!
//! A rollback first enumerates its steps as a typed plan with a risk
//! assessment, then executes them under a process-global semaphore (at
//! most one rollback in flight). A failing step triggers best-effort
//! recovery of the partial state; post-rollback verification runs the
//! three core integrity checks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::model::{Bot, CollectionMetadata, CollectionStatus};
use ragweave_storage::repository::{ChunkStore, CollectionMetadataStore, DocumentStore};
use ragweave_storage::vector::VectorStore;

use crate::integrity::{IntegrityCheck, IntegrityService};
use crate::snapshot::SnapshotService;

/// One kind of rollback step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackAction {
    /// Snapshot the current state before touching anything
    CreateCurrentBackup,
    /// Drop the bot's vector collection
    DeleteVectorCollection,
    /// Delete the bot's chunk rows
    DeleteChunks,
    /// Reset every document's chunk count to zero
    ResetDocumentCounts,
    /// Restore the collection descriptor from the snapshot
    RestoreCollectionConfig,
    /// Verify the post-rollback state
    VerifyRollback,
}

/// Step risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Reversible or additive
    Low,
    /// Destructive but recoverable
    Medium,
    /// Destructive and hard to recover
    High,
}

/// One planned step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStep {
    /// 1-based position in the plan
    pub step: usize,
    /// What the step does
    pub action: RollbackAction,
    /// Human-readable description
    pub description: String,
    /// Rough duration estimate in seconds
    pub estimated_duration: f64,
    /// Risk of the step
    pub risk: RiskLevel,
}

/// Full rollback plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Snapshot to restore
    pub snapshot_id: String,
    /// Bot being rolled back
    pub bot_id: Uuid,
    /// Ordered steps
    pub steps: Vec<RollbackStep>,
    /// Sum of step estimates in seconds
    pub estimated_duration: f64,
    /// Overall risk (high iff chunks get deleted)
    pub risk_level: RiskLevel,
}

/// Result of a rollback execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// Whether every step completed and verification passed
    pub success: bool,
    /// Snapshot that was restored
    pub snapshot_id: String,
    /// Bot that was rolled back
    pub bot_id: Uuid,
    /// Steps that completed
    pub steps_completed: usize,
    /// Steps in the plan
    pub total_steps: usize,
    /// Wall time in seconds
    pub duration: f64,
    /// Failure description, when unsuccessful
    pub error: Option<String>,
    /// Whether post-rollback verification passed
    pub verification_passed: bool,
    /// Whether partial-state recovery ran after a failed step
    pub recovery_attempted: bool,
    /// Whether that recovery succeeded
    pub recovery_successful: bool,
}

/// Rollback planning and execution service.
pub struct RollbackService {
    snapshots: Arc<SnapshotService>,
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    collections: Arc<dyn CollectionMetadataStore>,
    vector: Arc<dyn VectorStore>,
    integrity: Arc<IntegrityService>,
    rollback_semaphore: Semaphore,
}

impl std::fmt::Debug for RollbackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackService").finish_non_exhaustive()
    }
}

impl RollbackService {
    /// Create the service. The internal semaphore admits one rollback at
    /// a time for the whole process.
    #[must_use]
    pub fn new(
        snapshots: Arc<SnapshotService>,
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        collections: Arc<dyn CollectionMetadataStore>,
        vector: Arc<dyn VectorStore>,
        integrity: Arc<IntegrityService>,
    ) -> Self {
        Self {
            snapshots,
            documents,
            chunks,
            collections,
            vector,
            integrity,
            rollback_semaphore: Semaphore::new(1),
        }
    }

    /// Enumerate the steps required to restore the snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound` when the snapshot does not exist; `Validation` when it
    /// belongs to a different bot.
    pub async fn create_plan(&self, snapshot_id: &str, bot_id: Uuid) -> Result<RollbackPlan> {
        let snapshot = self
            .snapshots
            .load(snapshot_id)
            .await
            .ok_or_else(|| RagweaveError::not_found("snapshot", snapshot_id))?;

        if snapshot.bot_id != bot_id {
            return Err(RagweaveError::Validation {
                message: format!("Snapshot {snapshot_id} is not for bot {bot_id}"),
            });
        }

        let current_doc_count = self
            .documents
            .count_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;
        let current_chunk_count = self
            .chunks
            .count_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;

        let mut steps = Vec::new();
        steps.push(RollbackStep {
            step: steps.len() + 1,
            action: RollbackAction::CreateCurrentBackup,
            description: "Create backup of the current state before rollback".to_string(),
            estimated_duration: 30.0,
            risk: RiskLevel::Low,
        });

        if current_chunk_count > 0 {
            steps.push(RollbackStep {
                step: steps.len() + 1,
                action: RollbackAction::DeleteVectorCollection,
                description: "Delete the current vector collection".to_string(),
                estimated_duration: 10.0,
                risk: RiskLevel::Medium,
            });
            steps.push(RollbackStep {
                step: steps.len() + 1,
                action: RollbackAction::DeleteChunks,
                description: format!("Delete {current_chunk_count} current chunks"),
                estimated_duration: (current_chunk_count as f64 * 0.01).max(5.0),
                risk: RiskLevel::High,
            });
        }

        if current_doc_count > 0 {
            steps.push(RollbackStep {
                step: steps.len() + 1,
                action: RollbackAction::ResetDocumentCounts,
                description: format!("Reset chunk counts for {current_doc_count} documents"),
                estimated_duration: (current_doc_count as f64 * 0.1).max(2.0),
                risk: RiskLevel::Medium,
            });
        }

        if snapshot.collection_config.is_some() {
            steps.push(RollbackStep {
                step: steps.len() + 1,
                action: RollbackAction::RestoreCollectionConfig,
                description: "Restore the collection configuration from the snapshot".to_string(),
                estimated_duration: 5.0,
                risk: RiskLevel::Low,
            });
        }

        steps.push(RollbackStep {
            step: steps.len() + 1,
            action: RollbackAction::VerifyRollback,
            description: "Verify the rollback completed cleanly".to_string(),
            estimated_duration: 15.0,
            risk: RiskLevel::Low,
        });

        let estimated_duration = steps.iter().map(|s| s.estimated_duration).sum();
        let risk_level = steps
            .iter()
            .map(|s| s.risk)
            .max()
            .unwrap_or(RiskLevel::Low);

        info!(
            "rollback plan for snapshot {snapshot_id}: {} steps, ~{estimated_duration:.0}s, risk {risk_level:?}",
            steps.len()
        );

        Ok(RollbackPlan {
            snapshot_id: snapshot_id.to_string(),
            bot_id,
            steps,
            estimated_duration,
            risk_level,
        })
    }

    /// Execute a rollback to the snapshot.
    ///
    /// Holds the global rollback permit for the duration; a second
    /// rollback queued behind it waits its turn.
    ///
    /// # Errors
    ///
    /// Plan-creation failures (`NotFound`, `Validation`) surface as
    /// errors; step failures are reported inside the outcome instead.
    pub async fn execute(
        &self,
        snapshot_id: &str,
        bot_id: Uuid,
        verify_after: bool,
    ) -> Result<RollbackOutcome> {
        let _permit = self
            .rollback_semaphore
            .acquire()
            .await
            .map_err(RagweaveError::storage)?;
        let start = Instant::now();

        info!("starting rollback to snapshot {snapshot_id} for bot {bot_id}");
        let plan = self.create_plan(snapshot_id, bot_id).await?;

        let mut completed = 0;
        for step in &plan.steps {
            info!("executing rollback step {}: {}", step.step, step.description);
            match self.execute_step(step, snapshot_id, bot_id).await {
                Ok(()) => completed += 1,
                Err(err) => {
                    error!("rollback step {} failed: {err}", step.step);
                    let recovered = self.attempt_recovery(bot_id).await;

                    return Ok(RollbackOutcome {
                        success: false,
                        snapshot_id: snapshot_id.to_string(),
                        bot_id,
                        steps_completed: completed,
                        total_steps: plan.steps.len(),
                        duration: start.elapsed().as_secs_f64(),
                        error: Some(format!("Step {} failed: {err}", step.step)),
                        verification_passed: false,
                        recovery_attempted: true,
                        recovery_successful: recovered,
                    });
                }
            }
        }

        let mut verification_passed = true;
        if verify_after {
            let results = self
                .integrity
                .verify(bot_id, &IntegrityCheck::CORE, false)
                .await;
            verification_passed = !IntegrityService::has_critical_issues(&results);
        }

        let duration = start.elapsed().as_secs_f64();
        if verification_passed {
            info!("rollback to snapshot {snapshot_id} completed in {duration:.2}s");
        } else {
            error!("rollback verification failed for snapshot {snapshot_id}");
        }

        Ok(RollbackOutcome {
            success: verification_passed,
            snapshot_id: snapshot_id.to_string(),
            bot_id,
            steps_completed: completed,
            total_steps: plan.steps.len(),
            duration,
            error: (!verification_passed).then(|| "Rollback verification failed".to_string()),
            verification_passed,
            recovery_attempted: false,
            recovery_successful: false,
        })
    }

    async fn execute_step(
        &self,
        step: &RollbackStep,
        snapshot_id: &str,
        bot_id: Uuid,
    ) -> anyhow::Result<()> {
        match step.action {
            RollbackAction::CreateCurrentBackup => {
                let ts = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                let backup_id = format!("pre_rollback_{snapshot_id}_{ts}");
                self.snapshots.create_snapshot(bot_id, Some(backup_id)).await?;
            }
            RollbackAction::DeleteVectorCollection => {
                let collection = Bot::collection_name_for(bot_id);
                if let Err(err) = self.vector.delete_collection(&collection).await {
                    // Missing collections are fine during rollback
                    warn!("failed to delete vector collection during rollback: {err}");
                }
            }
            RollbackAction::DeleteChunks => {
                let removed = self.chunks.delete_for_bot(bot_id).await?;
                info!("deleted {removed} chunks during rollback");
            }
            RollbackAction::ResetDocumentCounts => {
                let documents = self.documents.list_for_bot(bot_id).await?;
                for doc in documents {
                    self.documents.set_chunk_count(doc.id, 0).await?;
                }
            }
            RollbackAction::RestoreCollectionConfig => {
                let snapshot = self
                    .snapshots
                    .load(snapshot_id)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("snapshot {snapshot_id} disappeared"))?;
                if let Some(config) = snapshot.collection_config {
                    self.collections
                        .upsert(CollectionMetadata {
                            bot_id,
                            collection_name: Bot::collection_name_for(bot_id),
                            embedding_provider: config.embedding_provider,
                            embedding_model: config.embedding_model,
                            embedding_dimension: config.embedding_dimension,
                            status: CollectionStatus::Inactive,
                            points_count: 0,
                        })
                        .await?;
                }
            }
            RollbackAction::VerifyRollback => {
                let chunk_count = self.chunks.count_for_bot(bot_id).await?;
                if chunk_count != 0 {
                    anyhow::bail!(
                        "rollback verification failed: expected 0 chunks, found {chunk_count}"
                    );
                }

                if let Some(snapshot) = self.snapshots.load(snapshot_id).await {
                    let doc_count = self.documents.count_for_bot(bot_id).await?;
                    if doc_count != snapshot.document_count {
                        warn!(
                            "document count mismatch after rollback: expected {}, found {doc_count}",
                            snapshot.document_count
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Best-effort cleanup after a failed step: delete stray chunks and
    /// reset counts so the bot is at least in the clean post-rollback
    /// state.
    async fn attempt_recovery(&self, bot_id: Uuid) -> bool {
        info!("attempting rollback recovery for bot {bot_id}");

        let result: anyhow::Result<()> = async {
            self.chunks.delete_for_bot(bot_id).await?;
            let documents = self.documents.list_for_bot(bot_id).await?;
            for doc in documents {
                self.documents.set_chunk_count(doc.id, 0).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                error!("rollback recovery failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragweave_core::model::{Bot, Chunk, Document};
    use ragweave_storage::memory::{
        MemoryBotStore, MemoryChunkStore, MemoryCollectionMetadataStore, MemoryDocumentStore,
        MemoryVectorStore,
    };
    use ragweave_storage::repository::BotStore;
    use ragweave_storage::vector::DistanceMetric;

    struct Fixture {
        service: RollbackService,
        snapshots: Arc<SnapshotService>,
        bot: Bot,
        documents: Arc<MemoryDocumentStore>,
        chunks: Arc<MemoryChunkStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let bots = Arc::new(MemoryBotStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let chunks = Arc::new(MemoryChunkStore::new());
        let collections = Arc::new(MemoryCollectionMetadataStore::new());
        let vector = Arc::new(MemoryVectorStore::new());
        let dir = tempfile::tempdir().expect("tempdir");

        let bot = Bot::new(Uuid::new_v4(), "b", "openai", "text-embedding-3-small");
        bots.upsert(bot.clone()).await.unwrap();

        let snapshots = Arc::new(SnapshotService::new(
            bots.clone(),
            documents.clone(),
            chunks.clone(),
            collections.clone(),
            vector.clone(),
            dir.path().to_path_buf(),
            7,
        ));
        let integrity = Arc::new(IntegrityService::new(
            bots,
            documents.clone(),
            chunks.clone(),
            collections.clone(),
            vector.clone(),
        ));

        Fixture {
            service: RollbackService::new(
                snapshots.clone(),
                documents.clone(),
                chunks.clone(),
                collections,
                vector,
                integrity,
            ),
            snapshots,
            bot,
            documents,
            chunks,
            _dir: dir,
        }
    }

    async fn seed_document(f: &Fixture, chunk_count: u32) -> Document {
        let doc = Document {
            id: Uuid::new_v4(),
            bot_id: f.bot.id,
            uploader_id: f.bot.owner_id,
            filename: "f.txt".to_string(),
            file_path: "/data/f.txt".to_string(),
            file_size: 10,
            chunk_count,
        };
        f.documents.upsert(doc.clone()).await.unwrap();

        let chunks: Vec<Chunk> = (0..chunk_count)
            .map(|i| Chunk {
                id: Uuid::new_v4(),
                document_id: doc.id,
                bot_id: f.bot.id,
                chunk_index: i,
                content: format!("chunk {i}"),
                embedding_id: format!("e{i}"),
            })
            .collect();
        f.chunks.insert_many(chunks).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_plan_risk_reflects_chunk_deletion() {
        let f = fixture().await;
        seed_document(&f, 3).await;

        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();
        let plan = f
            .service
            .create_plan(&snapshot.snapshot_id, f.bot.id)
            .await
            .unwrap();

        assert_eq!(plan.risk_level, RiskLevel::High);
        assert!(plan
            .steps
            .iter()
            .any(|s| s.action == RollbackAction::DeleteChunks));
        assert!(plan.estimated_duration > 0.0);
    }

    #[tokio::test]
    async fn test_plan_without_chunks_is_not_high_risk() {
        let f = fixture().await;
        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();
        let plan = f
            .service
            .create_plan(&snapshot.snapshot_id, f.bot.id)
            .await
            .unwrap();

        assert_ne!(plan.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_execute_reaches_clean_state() {
        let f = fixture().await;
        let doc = seed_document(&f, 3).await;
        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();

        // More data lands after the snapshot; the rollback wipes it
        seed_document(&f, 2).await;

        let outcome = f
            .service
            .execute(&snapshot.snapshot_id, f.bot.id, true)
            .await
            .unwrap();

        assert!(outcome.success, "rollback failed: {:?}", outcome.error);
        assert_eq!(outcome.steps_completed, outcome.total_steps);
        assert!(outcome.verification_passed);

        // Post-rollback clean state: zero chunks, zeroed counts
        assert_eq!(f.chunks.count_for_bot(f.bot.id).await.unwrap(), 0);
        let restored = f.documents.get(doc.id).await.unwrap().unwrap();
        assert_eq!(restored.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_pre_rollback_backup_created() {
        let f = fixture().await;
        seed_document(&f, 1).await;
        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();

        f.service
            .execute(&snapshot.snapshot_id, f.bot.id, false)
            .await
            .unwrap();

        let listed = f.snapshots.list(Some(f.bot.id));
        assert!(listed
            .iter()
            .any(|s| s.snapshot_id.starts_with("pre_rollback_")));
    }

    #[tokio::test]
    async fn test_rollbacks_serialize() {
        // Two rollbacks never overlap: the second waits on the global
        // permit and still completes
        let f = fixture().await;
        seed_document(&f, 2).await;
        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();

        let outcome_a = f
            .service
            .execute(&snapshot.snapshot_id, f.bot.id, false)
            .await
            .unwrap();
        let outcome_b = f
            .service
            .execute(&snapshot.snapshot_id, f.bot.id, false)
            .await
            .unwrap();

        assert!(outcome_a.success);
        assert!(outcome_b.success);
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_not_found() {
        let f = fixture().await;
        let err = f.service.create_plan("missing", f.bot.id).await.unwrap_err();
        assert!(matches!(err, RagweaveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_for_other_bot_rejected() {
        let f = fixture().await;
        let snapshot = f.snapshots.create_snapshot(f.bot.id, None).await.unwrap();
        let err = f
            .service
            .create_plan(&snapshot.snapshot_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RagweaveError::Validation { .. }));
    }
}
