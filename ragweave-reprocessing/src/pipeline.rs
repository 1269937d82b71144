//! Batched, error-isolated, checkpointed document reprocessing
//!
//! Phases run strictly in order: initialization, backup, processing,
//! integrity, cleanup. Documents process in fixed-size batches with
//! bounded concurrency and per-document retries; one document's failure
//! never aborts its batch. Checkpoints land every few batches so an
//! interrupted operation can resume, and a failed integrity gate rolls
//! the bot back to the pre-operation snapshot.

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::model::{Bot, CollectionMetadata, CollectionStatus, Document};
use ragweave_providers::credentials::CredentialResolver;
use ragweave_providers::registry::ProviderRegistry;
use ragweave_storage::repository::{BotStore, ChunkStore, CollectionMetadataStore, DocumentStore};
use ragweave_storage::vector::{DistanceMetric, VectorStore};

use crate::checkpoint::{checkpoint_timestamp, Checkpoint, CheckpointStore};
use crate::integrity::{IntegrityService, IssueLevel};
use crate::processor::DocumentProcessor;
use crate::rollback::RollbackService;
use crate::snapshot::SnapshotService;
use crate::storage_engine::ChunkStorageEngine;

/// Lifecycle status of a reprocessing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessingStatus {
    /// Queued, not yet started
    Pending,
    /// In flight
    Running,
    /// Finished successfully
    Completed,
    /// Finished with a terminal failure
    Failed,
    /// Cancelled before completion
    Cancelled,
}

/// Phases of a reprocessing operation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessingPhase {
    /// Validate the bot and prepare the vector collection
    Initialization,
    /// Capture the pre-operation snapshot
    Backup,
    /// Batch document processing
    Processing,
    /// Structural verification
    Integrity,
    /// Remove backup and checkpoint files
    Cleanup,
    /// Terminal
    Done,
}

/// Result of processing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Document processed
    pub document_id: Uuid,
    /// Whether the document reprocessed successfully
    pub success: bool,
    /// Chunks the parser produced
    pub chunks_processed: u32,
    /// Chunks stored after deduplication
    pub chunks_stored: u32,
    /// Wall time in seconds
    pub processing_time: f64,
    /// Attempts consumed
    pub attempts: u32,
    /// Terminal error, when unsuccessful
    pub error: Option<String>,
}

/// One error surfaced in the terminal report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    /// Document the error belongs to, when document-scoped
    pub document_id: Option<Uuid>,
    /// Filename for context
    pub filename: Option<String>,
    /// Error description
    pub error: String,
    /// Machine-readable error category
    pub error_type: String,
}

/// Live progress of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessingProgress {
    /// Operation identifier
    pub operation_id: String,
    /// Bot being reprocessed
    pub bot_id: Uuid,
    /// Lifecycle status
    pub status: ReprocessingStatus,
    /// Current phase
    pub phase: ReprocessingPhase,
    /// Documents in scope
    pub total_documents: usize,
    /// Documents with a result so far
    pub processed_documents: usize,
    /// Successes so far
    pub successful_documents: usize,
    /// Failures so far
    pub failed_documents: usize,
    /// Batch currently in flight (1-based)
    pub current_batch: usize,
    /// Batches in the operation
    pub total_batches: usize,
    /// Unix seconds at start
    pub started_at: f64,
}

/// Terminal report of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessingReport {
    /// Operation identifier
    pub operation_id: String,
    /// Bot that was reprocessed
    pub bot_id: Uuid,
    /// Terminal status
    pub status: ReprocessingStatus,
    /// Documents in scope
    pub total_documents: usize,
    /// Documents reprocessed successfully
    pub successful_documents: usize,
    /// Documents that failed all attempts
    pub failed_documents: usize,
    /// Documents never dispatched because of cancellation
    pub cancelled_documents: usize,
    /// Chunks produced by parsing
    pub total_chunks_processed: u32,
    /// Chunks stored (deduplication may reduce)
    pub total_chunks_stored: u32,
    /// Wall time in seconds
    pub processing_time: f64,
    /// Unix seconds at start
    pub started_at: f64,
    /// Unix seconds at end
    pub ended_at: f64,
    /// Errors encountered
    pub errors: Vec<OperationError>,
    /// Per-document results
    pub document_results: Vec<DocumentOutcome>,
    /// Whether integrity verification passed
    pub integrity_verified: bool,
    /// Whether a rollback ran
    pub rollback_performed: bool,
    /// Whether the backup fell back to the minimal record
    pub backup_fallback: bool,
    /// Whether the operation hit its deadline
    pub timed_out: bool,
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Documents per batch
    pub batch_size: usize,
    /// Concurrent documents within a batch
    pub max_concurrent_documents: usize,
    /// Batches between checkpoints
    pub checkpoint_interval: usize,
    /// Attempts per document
    pub max_retries_per_document: u32,
    /// Base delay before a retry; doubles per attempt
    pub retry_base_delay: Duration,
    /// Run the integrity gate after processing
    pub enable_integrity_verification: bool,
    /// Root for snapshots, checkpoints and backups
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent_documents: 5,
            checkpoint_interval: 5,
            max_retries_per_document: 3,
            retry_base_delay: Duration::from_secs(2),
            enable_integrity_verification: true,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Options for one reprocessing request.
#[derive(Debug, Clone)]
pub struct ReprocessOptions {
    /// Batch size override
    pub batch_size: Option<usize>,
    /// Delete and recreate the vector collection first
    pub force_recreate_collection: bool,
    /// Roll back to the pre-operation snapshot on a failed integrity gate
    pub enable_rollback: bool,
    /// Explicit operation id (resume or external scheduling)
    pub operation_id: Option<String>,
}

impl Default for ReprocessOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            force_recreate_collection: false,
            enable_rollback: true,
            operation_id: None,
        }
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The document reprocessing pipeline.
pub struct ReprocessingPipeline {
    bots: Arc<dyn BotStore>,
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    collections: Arc<dyn CollectionMetadataStore>,
    vector: Arc<dyn VectorStore>,
    processor: Arc<dyn DocumentProcessor>,
    credentials: Arc<CredentialResolver>,
    registry: Arc<ProviderRegistry>,
    snapshots: Arc<SnapshotService>,
    integrity: Arc<IntegrityService>,
    rollback: Arc<RollbackService>,
    checkpoints: CheckpointStore,
    storage: ChunkStorageEngine,
    config: PipelineConfig,
    progress: DashMap<String, ReprocessingProgress>,
    active: DashMap<String, CancellationToken>,
    completed: DashMap<String, ReprocessingReport>,
}

impl std::fmt::Debug for ReprocessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReprocessingPipeline")
            .field("active", &self.active.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReprocessingPipeline {
    /// Wire up the pipeline.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        bots: Arc<dyn BotStore>,
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        collections: Arc<dyn CollectionMetadataStore>,
        vector: Arc<dyn VectorStore>,
        processor: Arc<dyn DocumentProcessor>,
        credentials: Arc<CredentialResolver>,
        registry: Arc<ProviderRegistry>,
        snapshots: Arc<SnapshotService>,
        integrity: Arc<IntegrityService>,
        rollback: Arc<RollbackService>,
        config: PipelineConfig,
    ) -> Self {
        let checkpoints = CheckpointStore::new(config.data_dir.clone());
        let storage = ChunkStorageEngine::new(documents.clone(), chunks.clone(), vector.clone());

        Self {
            bots,
            documents,
            chunks,
            collections,
            vector,
            processor,
            credentials,
            registry,
            snapshots,
            integrity,
            rollback,
            checkpoints,
            storage,
            config,
            progress: DashMap::new(),
            active: DashMap::new(),
            completed: DashMap::new(),
        }
    }

    /// Enqueue-and-start a reprocessing operation. Progress tracking is
    /// initialized before this returns, so the caller can poll
    /// immediately.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing bot, `PermissionDenied` when the caller
    /// does not own it, `Conflict` when the operation id is already
    /// running.
    pub async fn start(
        self: &Arc<Self>,
        bot_id: Uuid,
        user_id: Uuid,
        options: ReprocessOptions,
    ) -> Result<String> {
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        if bot.owner_id != user_id {
            return Err(RagweaveError::PermissionDenied {
                message: "Only the bot owner can reprocess its documents".to_string(),
            });
        }

        let operation_id = options
            .operation_id
            .clone()
            .unwrap_or_else(|| format!("reprocess_{bot_id}_{}", now_epoch() as u64));

        if self.active.contains_key(&operation_id) {
            return Err(RagweaveError::Conflict {
                message: format!("Reprocessing operation {operation_id} already in progress"),
            });
        }

        self.init_progress(&operation_id, bot_id);
        let cancel = CancellationToken::new();
        self.active.insert(operation_id.clone(), cancel.clone());

        let pipeline = Arc::clone(self);
        let task_operation_id = operation_id.clone();
        tokio::spawn(async move {
            let report = pipeline
                .run_operation(&task_operation_id, bot_id, user_id, options, cancel)
                .await;
            info!(
                "reprocessing operation {task_operation_id} finished with status {:?}",
                report.status
            );
        });

        info!("started reprocessing operation {operation_id} for bot {bot_id}");
        Ok(operation_id)
    }

    fn init_progress(&self, operation_id: &str, bot_id: Uuid) {
        self.progress.insert(
            operation_id.to_string(),
            ReprocessingProgress {
                operation_id: operation_id.to_string(),
                bot_id,
                status: ReprocessingStatus::Running,
                phase: ReprocessingPhase::Initialization,
                total_documents: 0,
                processed_documents: 0,
                successful_documents: 0,
                failed_documents: 0,
                current_batch: 0,
                total_batches: 0,
                started_at: now_epoch(),
            },
        );
    }

    fn set_phase(&self, operation_id: &str, phase: ReprocessingPhase) {
        if let Some(mut progress) = self.progress.get_mut(operation_id) {
            progress.phase = phase;
        }
        info!("operation {operation_id} entered phase {phase:?}");
    }

    /// Run an operation to completion and return its report. Used
    /// directly by the queue manager; [`Self::start`] spawns it.
    pub async fn run_operation(
        &self,
        operation_id: &str,
        bot_id: Uuid,
        user_id: Uuid,
        options: ReprocessOptions,
        cancel: CancellationToken,
    ) -> ReprocessingReport {
        if !self.progress.contains_key(operation_id) {
            self.init_progress(operation_id, bot_id);
        }
        self.active
            .entry(operation_id.to_string())
            .or_insert_with(|| cancel.clone());

        let started = now_epoch();
        let timer = Instant::now();

        let report = match self
            .execute_phases(operation_id, bot_id, user_id, &options, &cancel, started, timer)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                error!("reprocessing operation {operation_id} failed: {err}");
                let mut rollback_performed = false;
                if options.enable_rollback {
                    rollback_performed = self.try_rollback(operation_id, bot_id).await;
                }
                self.failure_report(
                    operation_id,
                    bot_id,
                    started,
                    timer,
                    err.to_string(),
                    rollback_performed,
                )
            }
        };

        if let Some(mut progress) = self.progress.get_mut(operation_id) {
            progress.status = report.status;
        }
        self.completed.insert(operation_id.to_string(), report.clone());
        self.active.remove(operation_id);
        self.progress.remove(operation_id);

        report
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    async fn execute_phases(
        &self,
        operation_id: &str,
        bot_id: Uuid,
        user_id: Uuid,
        options: &ReprocessOptions,
        cancel: &CancellationToken,
        started: f64,
        timer: Instant,
    ) -> Result<ReprocessingReport> {
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);

        // A checkpoint from an interrupted run must be read before any
        // phase overwrites it
        let resume_checkpoint = self.checkpoints.load(operation_id).await;
        if let Some(checkpoint) = &resume_checkpoint {
            info!(
                "resuming operation {operation_id} from checkpoint at batch {}",
                checkpoint.current_batch
            );
        }

        // Phase 1: initialization
        self.set_phase(operation_id, ReprocessingPhase::Initialization);
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;
        self.initialize_collection(&bot, options.force_recreate_collection)
            .await?;

        // Phase 2: backup (skipped when resuming past a completed backup)
        self.set_phase(operation_id, ReprocessingPhase::Backup);
        let backup_snapshot_id = format!("backup_{operation_id}");
        let backup_already_created = resume_checkpoint
            .as_ref()
            .is_some_and(|c| c.backup_created);
        let backup_fallback = if backup_already_created {
            false
        } else {
            let fallback = self
                .create_backup(operation_id, bot_id, &backup_snapshot_id)
                .await?;
            self.save_checkpoint(operation_id, ReprocessingPhase::Backup, &[], &[], 0, true)
                .await;
            fallback
        };

        // Phase 3: processing
        self.set_phase(operation_id, ReprocessingPhase::Processing);
        let (skip_processed, skip_failed) = resume_checkpoint
            .filter(|c| c.phase == ReprocessingPhase::Processing)
            .map(|c| (c.processed_documents, c.failed_documents))
            .unwrap_or_default();

        let all_documents = self
            .documents
            .list_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;

        let mut results: Vec<DocumentOutcome> = Vec::new();
        for id in &skip_processed {
            results.push(DocumentOutcome {
                document_id: *id,
                success: true,
                chunks_processed: 0,
                chunks_stored: 0,
                processing_time: 0.0,
                attempts: 0,
                error: None,
            });
        }
        for id in &skip_failed {
            results.push(DocumentOutcome {
                document_id: *id,
                success: false,
                chunks_processed: 0,
                chunks_stored: 0,
                processing_time: 0.0,
                attempts: 0,
                error: Some("failed before checkpoint resume".to_string()),
            });
        }

        let pending: Vec<Document> = all_documents
            .iter()
            .filter(|d| !skip_processed.contains(&d.id) && !skip_failed.contains(&d.id))
            .cloned()
            .collect();

        let batches: Vec<Vec<Document>> = pending
            .chunks(batch_size)
            .map(<[Document]>::to_vec)
            .collect();

        if let Some(mut progress) = self.progress.get_mut(operation_id) {
            progress.total_documents = all_documents.len();
            progress.total_batches = batches.len();
            progress.processed_documents = results.len();
            progress.successful_documents = results.iter().filter(|r| r.success).count();
            progress.failed_documents = results.iter().filter(|r| !r.success).count();
        }

        let mut cancelled_documents = 0;
        let mut errors: Vec<OperationError> = Vec::new();
        let mut was_cancelled = false;

        for (batch_index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                // No further batches start; everything undispatched counts
                // as cancelled
                was_cancelled = true;
                cancelled_documents += batches
                    .iter()
                    .skip(batch_index)
                    .map(Vec::len)
                    .sum::<usize>();
                break;
            }

            if let Some(mut progress) = self.progress.get_mut(operation_id) {
                progress.current_batch = batch_index + 1;
            }
            info!(
                "processing batch {}/{} for operation {operation_id}",
                batch_index + 1,
                batches.len()
            );

            let outcomes: Vec<Option<DocumentOutcome>> = stream::iter(batch.iter().cloned())
                .map(|document| {
                    let bot = bot.clone();
                    async move {
                        if cancel.is_cancelled() {
                            // Cancelled before dispatch
                            return None;
                        }
                        Some(
                            self.process_single_document(&bot, user_id, &document, cancel)
                                .await,
                        )
                    }
                })
                .buffered(self.config.max_concurrent_documents)
                .collect()
                .await;

            for (outcome, document) in outcomes.into_iter().zip(batch.iter()) {
                match outcome {
                    Some(result) => {
                        if !result.success {
                            errors.push(OperationError {
                                document_id: Some(result.document_id),
                                filename: Some(document.filename.clone()),
                                error: result.error.clone().unwrap_or_default(),
                                error_type: "processing_error".to_string(),
                            });
                        }
                        results.push(result);
                    }
                    None => cancelled_documents += 1,
                }
            }

            if let Some(mut progress) = self.progress.get_mut(operation_id) {
                progress.processed_documents = results.len();
                progress.successful_documents = results.iter().filter(|r| r.success).count();
                progress.failed_documents = results.iter().filter(|r| !r.success).count();
            }

            if (batch_index + 1) % self.config.checkpoint_interval == 0 {
                let processed: Vec<Uuid> = results
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.document_id)
                    .collect();
                let failed: Vec<Uuid> = results
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| r.document_id)
                    .collect();
                self.save_checkpoint(
                    operation_id,
                    ReprocessingPhase::Processing,
                    &processed,
                    &failed,
                    batch_index + 1,
                    true,
                )
                .await;
            }
        }

        if cancel.is_cancelled() {
            was_cancelled = true;
        }

        // Keep the declared point count in step with the stores
        self.refresh_collection_metadata(&bot).await;

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.iter().filter(|r| !r.success).count();
        let total_chunks_processed: u32 = results.iter().map(|r| r.chunks_processed).sum();
        let total_chunks_stored: u32 = results.iter().map(|r| r.chunks_stored).sum();

        if was_cancelled {
            info!("operation {operation_id} cancelled mid-processing");
            return Ok(ReprocessingReport {
                operation_id: operation_id.to_string(),
                bot_id,
                status: ReprocessingStatus::Cancelled,
                total_documents: all_documents.len(),
                successful_documents: successful,
                failed_documents: failed,
                cancelled_documents,
                total_chunks_processed,
                total_chunks_stored,
                processing_time: timer.elapsed().as_secs_f64(),
                started_at: started,
                ended_at: now_epoch(),
                errors,
                document_results: results,
                integrity_verified: false,
                rollback_performed: false,
                backup_fallback,
                timed_out: false,
            });
        }

        // Phase 4: integrity verification
        let mut integrity_verified = true;
        if self.config.enable_integrity_verification {
            self.set_phase(operation_id, ReprocessingPhase::Integrity);
            let verification = self.integrity.verify(bot_id, &[], false).await;

            if IntegrityService::has_critical_issues(&verification) {
                integrity_verified = false;
                for result in verification.values() {
                    for issue in &result.issues {
                        if issue.level == IssueLevel::Critical {
                            errors.push(OperationError {
                                document_id: None,
                                filename: None,
                                error: issue.description.clone(),
                                error_type: "integrity_failure".to_string(),
                            });
                        }
                    }
                }

                let mut rollback_performed = false;
                if options.enable_rollback {
                    error!("integrity verification failed for {operation_id}, rolling back");
                    rollback_performed = self.try_rollback(operation_id, bot_id).await;
                }

                return Ok(ReprocessingReport {
                    operation_id: operation_id.to_string(),
                    bot_id,
                    status: ReprocessingStatus::Failed,
                    total_documents: all_documents.len(),
                    successful_documents: successful,
                    failed_documents: failed,
                    cancelled_documents,
                    total_chunks_processed,
                    total_chunks_stored,
                    processing_time: timer.elapsed().as_secs_f64(),
                    started_at: started,
                    ended_at: now_epoch(),
                    errors,
                    document_results: results,
                    integrity_verified: false,
                    rollback_performed,
                    backup_fallback,
                    timed_out: false,
                });
            }
        }

        // Phase 5: cleanup
        self.set_phase(operation_id, ReprocessingPhase::Cleanup);
        self.cleanup(operation_id, &backup_snapshot_id).await;

        self.set_phase(operation_id, ReprocessingPhase::Done);

        Ok(ReprocessingReport {
            operation_id: operation_id.to_string(),
            bot_id,
            status: ReprocessingStatus::Completed,
            total_documents: all_documents.len(),
            successful_documents: successful,
            failed_documents: failed,
            cancelled_documents,
            total_chunks_processed,
            total_chunks_stored,
            processing_time: timer.elapsed().as_secs_f64(),
            started_at: started,
            ended_at: now_epoch(),
            errors,
            document_results: results,
            integrity_verified,
            rollback_performed: false,
            backup_fallback,
            timed_out: false,
        })
    }

    async fn initialize_collection(&self, bot: &Bot, force_recreate: bool) -> Result<()> {
        let collection = bot.collection_name();

        if force_recreate {
            info!("recreating vector collection for bot {}", bot.id);
            if let Err(err) = self.vector.delete_collection(&collection).await {
                warn!("failed to delete existing collection: {err}");
            }
        }

        let provider = self
            .registry
            .embedding(&bot.embedding_provider)
            .ok_or_else(|| RagweaveError::Provider {
                provider: bot.embedding_provider.clone(),
                message: "no embedding provider registered".to_string(),
            })?;
        let dimension = provider.dimension(&bot.embedding_model);

        let exists = self
            .vector
            .collection_exists(&collection)
            .await
            .map_err(RagweaveError::storage)?;
        if !exists {
            self.vector
                .create_collection(&collection, dimension, DistanceMetric::Cosine)
                .await
                .map_err(RagweaveError::storage)?;
        }

        self.collections
            .upsert(CollectionMetadata {
                bot_id: bot.id,
                collection_name: collection,
                embedding_provider: bot.embedding_provider.clone(),
                embedding_model: bot.embedding_model.clone(),
                embedding_dimension: dimension,
                status: CollectionStatus::Active,
                points_count: 0,
            })
            .await
            .map_err(RagweaveError::storage)?;

        Ok(())
    }

    /// Create the pre-operation backup. Returns whether the minimal
    /// fallback record was used instead of a comprehensive snapshot.
    async fn create_backup(
        &self,
        operation_id: &str,
        bot_id: Uuid,
        snapshot_id: &str,
    ) -> Result<bool> {
        match self
            .snapshots
            .create_snapshot(bot_id, Some(snapshot_id.to_string()))
            .await
        {
            Ok(_) => Ok(false),
            Err(snapshot_error) => {
                warn!(
                    "comprehensive snapshot failed, falling back to minimal backup: {snapshot_error}"
                );

                let document_count = self
                    .documents
                    .count_for_bot(bot_id)
                    .await
                    .map_err(RagweaveError::storage)?;
                let chunk_count = self
                    .chunks
                    .count_for_bot(bot_id)
                    .await
                    .map_err(RagweaveError::storage)?;
                let collection_config = self
                    .collections
                    .get(bot_id)
                    .await
                    .map_err(RagweaveError::storage)?;

                let record = serde_json::json!({
                    "operation_id": operation_id,
                    "bot_id": bot_id.to_string(),
                    "backup_time": now_epoch(),
                    "document_count": document_count,
                    "chunk_count": chunk_count,
                    "collection_config": collection_config,
                    "backup_type": "minimal",
                    "fallback_reason": snapshot_error.to_string(),
                });

                let dir = self.config.data_dir.join("backups");
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(RagweaveError::storage)?;
                tokio::fs::write(
                    dir.join(format!("{operation_id}.json")),
                    serde_json::to_vec_pretty(&record).map_err(RagweaveError::storage)?,
                )
                .await
                .map_err(RagweaveError::storage)?;

                Ok(true)
            }
        }
    }

    async fn process_single_document(
        &self,
        bot: &Bot,
        user_id: Uuid,
        document: &Document,
        cancel: &CancellationToken,
    ) -> DocumentOutcome {
        let start = Instant::now();
        let attempts = self.config.max_retries_per_document.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if cancel.is_cancelled() && attempt > 0 {
                last_error = "operation cancelled during retry".to_string();
                break;
            }

            match self.reprocess_document_once(bot, user_id, document).await {
                Ok((processed, stored)) => {
                    return DocumentOutcome {
                        document_id: document.id,
                        success: true,
                        chunks_processed: processed,
                        chunks_stored: stored,
                        processing_time: start.elapsed().as_secs_f64(),
                        attempts: attempt + 1,
                        error: None,
                    };
                }
                Err(err) => {
                    warn!(
                        "attempt {} failed for document {}: {err}",
                        attempt + 1,
                        document.filename
                    );
                    last_error = err.to_string();
                    if attempt + 1 < attempts {
                        let delay = self.config.retry_base_delay * 2_u32.pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        DocumentOutcome {
            document_id: document.id,
            success: false,
            chunks_processed: 0,
            chunks_stored: 0,
            processing_time: start.elapsed().as_secs_f64(),
            attempts,
            error: Some(format!("Failed after {attempts} attempts: {last_error}")),
        }
    }

    async fn reprocess_document_once(
        &self,
        bot: &Bot,
        user_id: Uuid,
        document: &Document,
    ) -> anyhow::Result<(u32, u32)> {
        let collection = bot.collection_name();

        self.storage
            .delete_document_chunks(document.id, &collection)
            .await?;

        let bytes = tokio::fs::read(&document.file_path)
            .await
            .map_err(|err| anyhow::anyhow!("document file not readable: {err}"))?;

        let (chunks, _metadata) = self
            .processor
            .process(&bytes, &document.filename, document.id)
            .await?;
        if chunks.is_empty() {
            anyhow::bail!("no chunks extracted from document");
        }

        let resolved = self
            .credentials
            .resolve(bot.id, user_id, &bot.embedding_provider, true)
            .await?;
        let provider = self
            .registry
            .embedding(&resolved.provider)
            .ok_or_else(|| anyhow::anyhow!("no embedding provider for {}", resolved.provider))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = provider
            .generate_embeddings(&bot.embedding_model, &texts, &resolved.api_key)
            .await?;

        let processed = chunks.len() as u32;
        let outcome = self
            .storage
            .store_chunks(bot.id, document.id, &collection, chunks, embeddings, true)
            .await?;

        Ok((processed, outcome.stored_chunks))
    }

    async fn refresh_collection_metadata(&self, bot: &Bot) {
        let result: anyhow::Result<()> = async {
            let count = self.chunks.count_for_bot(bot.id).await?;
            if let Some(mut metadata) = self.collections.get(bot.id).await? {
                metadata.points_count = count as u64;
                metadata.status = CollectionStatus::Active;
                self.collections.upsert(metadata).await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!("failed to refresh collection metadata for {}: {err}", bot.id);
        }
    }

    async fn try_rollback(&self, operation_id: &str, bot_id: Uuid) -> bool {
        let snapshot_id = format!("backup_{operation_id}");
        match self.rollback.execute(&snapshot_id, bot_id, true).await {
            Ok(outcome) => outcome.success,
            Err(err) => {
                error!("rollback failed for operation {operation_id}: {err}");
                false
            }
        }
    }

    async fn save_checkpoint(
        &self,
        operation_id: &str,
        phase: ReprocessingPhase,
        processed: &[Uuid],
        failed: &[Uuid],
        current_batch: usize,
        backup_created: bool,
    ) {
        let Some(progress) = self.progress.get(operation_id).map(|p| p.clone()) else {
            return;
        };

        self.checkpoints
            .save(&Checkpoint {
                operation_id: operation_id.to_string(),
                bot_id: progress.bot_id,
                phase,
                processed_documents: processed.to_vec(),
                failed_documents: failed.to_vec(),
                current_batch,
                total_batches: progress.total_batches,
                backup_created,
                created_at: checkpoint_timestamp(),
            })
            .await;
    }

    async fn cleanup(&self, operation_id: &str, backup_snapshot_id: &str) {
        self.snapshots.delete(backup_snapshot_id).await;
        self.checkpoints.delete(operation_id).await;

        let backup_file = self
            .config
            .data_dir
            .join("backups")
            .join(format!("{operation_id}.json"));
        if let Err(err) = tokio::fs::remove_file(&backup_file).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove backup file {backup_file:?}: {err}");
            }
        }

        info!("cleanup completed for operation {operation_id}");
    }

    fn failure_report(
        &self,
        operation_id: &str,
        bot_id: Uuid,
        started: f64,
        timer: Instant,
        error: String,
        rollback_performed: bool,
    ) -> ReprocessingReport {
        ReprocessingReport {
            operation_id: operation_id.to_string(),
            bot_id,
            status: ReprocessingStatus::Failed,
            total_documents: 0,
            successful_documents: 0,
            failed_documents: 0,
            cancelled_documents: 0,
            total_chunks_processed: 0,
            total_chunks_stored: 0,
            processing_time: timer.elapsed().as_secs_f64(),
            started_at: started,
            ended_at: now_epoch(),
            errors: vec![OperationError {
                document_id: None,
                filename: None,
                error,
                error_type: "operation_failure".to_string(),
            }],
            document_results: Vec::new(),
            integrity_verified: false,
            rollback_performed,
            backup_fallback: false,
            timed_out: false,
        }
    }

    /// Live progress of an operation, when it is still tracked.
    #[must_use]
    pub fn get_progress(&self, operation_id: &str) -> Option<ReprocessingProgress> {
        self.progress.get(operation_id).map(|p| p.clone())
    }

    /// Terminal report of a completed operation.
    #[must_use]
    pub fn get_report(&self, operation_id: &str) -> Option<ReprocessingReport> {
        self.completed.get(operation_id).map(|r| r.clone())
    }

    /// Operation ids currently in flight.
    #[must_use]
    pub fn active_operations(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Roll a completed operation back to its pre-operation snapshot.
    ///
    /// Only possible while the backup snapshot still exists, i.e. for
    /// operations whose cleanup phase never ran (failures and
    /// cancellations).
    ///
    /// # Errors
    ///
    /// `NotFound` when no backup snapshot remains for the operation;
    /// rollback step failures surface inside the outcome.
    pub async fn rollback_operation(
        &self,
        operation_id: &str,
        bot_id: Uuid,
    ) -> Result<crate::rollback::RollbackOutcome> {
        let snapshot_id = format!("backup_{operation_id}");
        if self.snapshots.load(&snapshot_id).await.is_none() {
            return Err(RagweaveError::not_found("snapshot", snapshot_id));
        }
        self.rollback.execute(&snapshot_id, bot_id, true).await
    }

    /// Whether a backup snapshot still exists for the operation.
    pub async fn can_rollback(&self, operation_id: &str) -> bool {
        self.snapshots
            .load(&format!("backup_{operation_id}"))
            .await
            .is_some()
    }

    /// Cancel a running operation. In-flight document work finishes its
    /// current call; no new documents are dispatched.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        let Some(token) = self.active.get(operation_id) else {
            return false;
        };
        token.cancel();

        if let Some(mut progress) = self.progress.get_mut(operation_id) {
            progress.status = ReprocessingStatus::Cancelled;
        }
        info!("reprocessing operation {operation_id} cancelled");
        true
    }

    /// Detailed status of an operation: progress, percentages, backup
    /// and checkpoint presence.
    pub async fn detailed_status(&self, operation_id: &str) -> Option<serde_json::Value> {
        let progress = self.get_progress(operation_id);
        let report = self.get_report(operation_id);
        if progress.is_none() && report.is_none() {
            return None;
        }

        let checkpoint = self.checkpoints.load(operation_id).await;
        let backup_file = self
            .config
            .data_dir
            .join("backups")
            .join(format!("{operation_id}.json"));
        let backup_exists = tokio::fs::try_exists(&backup_file).await.unwrap_or(false)
            || self
                .snapshots
                .load(&format!("backup_{operation_id}"))
                .await
                .is_some();

        let (progress_percentage, success_rate, estimated_completion) =
            progress.as_ref().map_or((0.0, 0.0, None), |p| {
                let pct = if p.total_documents > 0 {
                    p.processed_documents as f64 / p.total_documents as f64 * 100.0
                } else {
                    0.0
                };
                let rate = if p.processed_documents > 0 {
                    p.successful_documents as f64 / p.processed_documents as f64 * 100.0
                } else {
                    0.0
                };
                // Project the remaining runtime from the observed pace
                let eta = if p.processed_documents > 0 && p.total_documents > p.processed_documents
                {
                    let elapsed = now_epoch() - p.started_at;
                    let per_document = elapsed / p.processed_documents as f64;
                    let remaining = (p.total_documents - p.processed_documents) as f64;
                    Some(now_epoch() + per_document * remaining)
                } else {
                    None
                };
                (pct, rate, eta)
            });

        Some(serde_json::json!({
            "operation_id": operation_id,
            "is_active": self.active.contains_key(operation_id),
            "progress": progress,
            "report": report,
            "progress_percentage": progress_percentage,
            "success_rate": success_rate,
            "estimated_completion": estimated_completion,
            "backup_exists": backup_exists,
            "checkpoint_exists": checkpoint.is_some(),
            "can_resume": checkpoint.is_some(),
        }))
    }
}
