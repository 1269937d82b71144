//! Priority-scheduled reprocessing operation queue
//!
//! Four FIFO sub-queues (LOW to URGENT); the scheduler dequeues from the
//! highest non-empty priority every tick, bounded by the global
//! concurrency cap. Each running operation gets a deadline; timed-out
//! operations yield a FAILED report marked as such.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_storage::repository::DocumentStore;

use crate::pipeline::{
    OperationError, ReprocessOptions, ReprocessingPipeline, ReprocessingReport,
    ReprocessingStatus,
};

/// Priority levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationPriority {
    /// Background housekeeping
    Low,
    /// Default priority
    Normal,
    /// User-facing maintenance
    High,
    /// Drop-everything operations
    Urgent,
}

impl OperationPriority {
    /// Priorities in dequeue order (highest first).
    pub const DESCENDING: [Self; 4] = [Self::Urgent, Self::High, Self::Normal, Self::Low];
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Nothing queued or running
    Idle,
    /// Operations in flight
    Processing,
    /// Dequeueing suspended
    Paused,
    /// Draining for shutdown
    ShuttingDown,
}

/// A queued reprocessing request.
#[derive(Debug, Clone)]
pub struct QueuedOperation {
    /// Operation identifier
    pub operation_id: String,
    /// Bot to reprocess
    pub bot_id: Uuid,
    /// Requesting user
    pub user_id: Uuid,
    /// Priority class
    pub priority: OperationPriority,
    /// Pipeline options
    pub options: ReprocessOptions,
    /// Unix seconds at enqueue
    pub queued_at: f64,
    /// Unix seconds at launch, once started
    pub started_at: Option<f64>,
    /// Estimated runtime in seconds
    pub estimated_duration: f64,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    /// Operations ever enqueued
    pub total_operations: usize,
    /// Currently queued
    pub queued_operations: usize,
    /// Currently running
    pub running_operations: usize,
    /// Completed successfully
    pub completed_operations: usize,
    /// Failed (including timeouts)
    pub failed_operations: usize,
    /// Cancelled before or during execution
    pub cancelled_operations: usize,
    /// Mean runtime of finished operations in seconds
    pub average_processing_time: f64,
    /// Mean queue wait in seconds
    pub average_wait_time: f64,
    /// Running / concurrency cap
    pub resource_utilization: f64,
}

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Operations running at once
    pub max_concurrent_operations: usize,
    /// Queue capacity across all priorities
    pub max_queue_size: usize,
    /// Scheduler tick
    pub queue_check_interval: Duration,
    /// Per-operation deadline
    pub operation_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 3,
            max_queue_size: 100,
            queue_check_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct RunningOperation {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    started_at: f64,
}

/// Counters shared with the operation tasks.
#[derive(Debug, Default)]
struct SharedCounters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    total_enqueued: AtomicUsize,
    processing_times: Mutex<Vec<f64>>,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The reprocessing queue manager.
pub struct ReprocessingQueueManager {
    pipeline: Arc<ReprocessingPipeline>,
    documents: Arc<dyn DocumentStore>,
    config: QueueConfig,
    queues: Mutex<HashMap<OperationPriority, VecDeque<QueuedOperation>>>,
    running: DashMap<String, RunningOperation>,
    completed: Arc<DashMap<String, ReprocessingReport>>,
    metadata: DashMap<String, QueuedOperation>,
    status: RwLock<QueueStatus>,
    counters: Arc<SharedCounters>,
    wait_times: Mutex<Vec<f64>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ReprocessingQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReprocessingQueueManager")
            .field("status", &*self.status.read())
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl ReprocessingQueueManager {
    /// Create a queue manager over the pipeline.
    #[must_use]
    pub fn new(
        pipeline: Arc<ReprocessingPipeline>,
        documents: Arc<dyn DocumentStore>,
        config: QueueConfig,
    ) -> Self {
        let queues = OperationPriority::DESCENDING
            .iter()
            .map(|p| (*p, VecDeque::new()))
            .collect();

        Self {
            pipeline,
            documents,
            config,
            queues: Mutex::new(queues),
            running: DashMap::new(),
            completed: Arc::new(DashMap::new()),
            metadata: DashMap::new(),
            status: RwLock::new(QueueStatus::Idle),
            counters: Arc::new(SharedCounters::default()),
            wait_times: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the scheduler loop. Runs until [`Self::shutdown`].
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            info!("reprocessing queue scheduler started");
            let mut interval = tokio::time::interval(manager.config.queue_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = manager.shutdown.cancelled() => break,
                    _ = interval.tick() => manager.tick(),
                }
            }
            info!("reprocessing queue scheduler stopped");
        })
    }

    /// One scheduler tick: reap finished tasks, then dispatch while
    /// below the concurrency cap.
    fn tick(&self) {
        self.reap_finished();

        let status = *self.status.read();
        if !matches!(status, QueueStatus::Paused | QueueStatus::ShuttingDown) {
            while self.running.len() < self.config.max_concurrent_operations {
                let Some(operation) = self.dequeue_next() else {
                    break;
                };
                self.launch(operation);
            }

            let mut status = self.status.write();
            *status = if self.running.is_empty() && self.queued_count() == 0 {
                QueueStatus::Idle
            } else {
                QueueStatus::Processing
            };
        }
    }

    fn reap_finished(&self) {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|e| e.value().handle.is_finished())
            .map(|e| e.key().clone())
            .collect();
        for operation_id in finished {
            self.running.remove(&operation_id);
        }
    }

    fn dequeue_next(&self) -> Option<QueuedOperation> {
        let mut queues = self.queues.lock();
        for priority in OperationPriority::DESCENDING {
            if let Some(operation) = queues.get_mut(&priority).and_then(VecDeque::pop_front) {
                return Some(operation);
            }
        }
        None
    }

    fn launch(&self, mut operation: QueuedOperation) {
        let started = now_epoch();
        operation.started_at = Some(started);
        self.wait_times.lock().push(started - operation.queued_at);

        info!(
            "starting reprocessing operation {} (waited {:.1}s)",
            operation.operation_id,
            started - operation.queued_at
        );
        if let Some(mut meta) = self.metadata.get_mut(&operation.operation_id) {
            meta.started_at = Some(started);
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let completed = Arc::clone(&self.completed);
        let counters = Arc::clone(&self.counters);
        let timeout = self.config.operation_timeout;
        let operation_id = operation.operation_id.clone();

        let handle = tokio::spawn(async move {
            let run = pipeline.run_operation(
                &operation.operation_id,
                operation.bot_id,
                operation.user_id,
                operation.options.clone(),
                task_cancel.clone(),
            );

            let report = match tokio::time::timeout(timeout, run).await {
                Ok(report) => report,
                Err(_) => {
                    error!(
                        "operation {} timed out after {:.0}s",
                        operation.operation_id,
                        timeout.as_secs_f64()
                    );
                    task_cancel.cancel();
                    timeout_report(&operation, timeout)
                }
            };

            match report.status {
                ReprocessingStatus::Completed => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                }
                ReprocessingStatus::Cancelled => {
                    counters.cancelled.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            counters
                .processing_times
                .lock()
                .push(now_epoch() - started);
            info!(
                "operation {} finished with status {:?}",
                operation.operation_id, report.status
            );
            completed.insert(operation.operation_id.clone(), report);
        });

        self.running.insert(
            operation_id,
            RunningOperation {
                handle,
                cancel,
                started_at: started,
            },
        );
    }

    /// Enqueue a reprocessing operation.
    ///
    /// # Errors
    ///
    /// `Conflict` when the queue is full or the operation id already
    /// exists.
    pub async fn enqueue(
        &self,
        bot_id: Uuid,
        user_id: Uuid,
        options: ReprocessOptions,
        priority: OperationPriority,
    ) -> Result<String> {
        if self.queued_count() >= self.config.max_queue_size {
            return Err(RagweaveError::Conflict {
                message: "Reprocessing queue is full".to_string(),
            });
        }

        let operation_id = options
            .operation_id
            .clone()
            .unwrap_or_else(|| format!("reprocess_{bot_id}_{}", Uuid::new_v4()));

        if self.metadata.contains_key(&operation_id) {
            return Err(RagweaveError::Conflict {
                message: format!("Operation {operation_id} already exists"),
            });
        }

        let estimated_duration = self.estimate_duration(bot_id, options.batch_size).await;

        let operation = QueuedOperation {
            operation_id: operation_id.clone(),
            bot_id,
            user_id,
            priority,
            options,
            queued_at: now_epoch(),
            started_at: None,
            estimated_duration,
        };

        self.metadata.insert(operation_id.clone(), operation.clone());
        self.queues
            .lock()
            .entry(priority)
            .or_default()
            .push_back(operation);
        self.counters.total_enqueued.fetch_add(1, Ordering::SeqCst);

        info!("queued reprocessing operation {operation_id} for bot {bot_id} at {priority:?}");
        Ok(operation_id)
    }

    fn queued_count(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// Duration estimate: `docs * 2s + 30s`, shaped by batch size and
    /// blended with the rolling mean of the last ten actual runtimes.
    async fn estimate_duration(&self, bot_id: Uuid, batch_size: Option<usize>) -> f64 {
        let document_count = self.documents.count_for_bot(bot_id).await.unwrap_or(0);
        let mut estimate = document_count as f64 * 2.0 + 30.0;

        let batch_factor = (batch_size.unwrap_or(10) as f64 / 10.0).clamp(0.5, 2.0);
        estimate *= 2.0 - batch_factor;

        let times = self.counters.processing_times.lock();
        if !times.is_empty() {
            let recent = &times[times.len().saturating_sub(10)..];
            let average = recent.iter().sum::<f64>() / recent.len() as f64;
            estimate = (estimate + average) / 2.0;
        }

        estimate.max(60.0)
    }

    /// Wait estimate for a new operation of the given priority.
    #[must_use]
    pub fn estimate_wait(&self, priority: OperationPriority) -> f64 {
        let ahead: usize = {
            let queues = self.queues.lock();
            queues
                .iter()
                .filter(|(p, _)| **p >= priority)
                .map(|(_, q)| q.len())
                .sum()
        };
        if ahead == 0 {
            return 0.0;
        }

        let average = {
            let times = self.counters.processing_times.lock();
            if times.is_empty() {
                300.0
            } else {
                let recent = &times[times.len().saturating_sub(5)..];
                recent.iter().sum::<f64>() / recent.len() as f64
            }
        };

        let concurrency = ahead.min(self.config.max_concurrent_operations).max(1);
        ahead as f64 * average / concurrency as f64
    }

    fn queue_position(&self, operation_id: &str) -> Option<usize> {
        let queues = self.queues.lock();
        let mut position = 1;
        for priority in OperationPriority::DESCENDING {
            if let Some(queue) = queues.get(&priority) {
                for operation in queue {
                    if operation.operation_id == operation_id {
                        return Some(position);
                    }
                    position += 1;
                }
            }
        }
        None
    }

    /// Comprehensive status of one operation: queued, running or
    /// completed.
    pub async fn operation_status(&self, operation_id: &str) -> Option<serde_json::Value> {
        let meta = self.metadata.get(operation_id).map(|m| m.clone())?;

        if let Some(running) = self.running.get(operation_id) {
            let started_at = running.started_at;
            drop(running);
            let detailed = self.pipeline.detailed_status(operation_id).await;
            return Some(serde_json::json!({
                "operation_id": operation_id,
                "queue_status": "running",
                "started_at": started_at,
                "elapsed": now_epoch() - started_at,
                "estimated_duration": meta.estimated_duration,
                "detailed_status": detailed,
            }));
        }

        if let Some(report) = self.completed.get(operation_id) {
            return Some(serde_json::json!({
                "operation_id": operation_id,
                "queue_status": "completed",
                "report": report.clone(),
            }));
        }

        Some(serde_json::json!({
            "operation_id": operation_id,
            "queue_status": "queued",
            "priority": meta.priority,
            "queue_position": self.queue_position(operation_id),
            "estimated_wait": self.estimate_wait(meta.priority),
            "queued_at": meta.queued_at,
            "can_cancel": true,
        }))
    }

    /// Terminal report of a completed operation.
    #[must_use]
    pub fn report(&self, operation_id: &str) -> Option<ReprocessingReport> {
        self.completed.get(operation_id).map(|r| r.clone())
    }

    /// Rollback capability of a completed operation.
    pub async fn rollback_status(&self, operation_id: &str) -> serde_json::Value {
        let Some(meta) = self.metadata.get(operation_id).map(|m| m.clone()) else {
            return serde_json::json!({ "status": "operation_not_found" });
        };

        let completed = self.completed.contains_key(operation_id);
        let backup_exists = self.pipeline.can_rollback(operation_id).await;
        let already_rolled_back = self
            .completed
            .get(operation_id)
            .is_some_and(|r| r.rollback_performed);

        serde_json::json!({
            "operation_id": operation_id,
            "bot_id": meta.bot_id.to_string(),
            "operation_status": if completed { "completed" } else { "not_completed" },
            "backup_exists": backup_exists,
            "rollback_performed": already_rolled_back,
            "can_rollback": completed && backup_exists && !already_rolled_back,
        })
    }

    /// Trigger a rollback for a completed operation.
    ///
    /// # Errors
    ///
    /// `Validation` when the operation has not completed; `NotFound` when
    /// the operation is unknown or its backup snapshot is gone.
    pub async fn trigger_rollback(
        &self,
        operation_id: &str,
    ) -> Result<crate::rollback::RollbackOutcome> {
        let meta = self
            .metadata
            .get(operation_id)
            .map(|m| m.clone())
            .ok_or_else(|| RagweaveError::not_found("operation", operation_id))?;

        if !self.completed.contains_key(operation_id) {
            return Err(RagweaveError::Validation {
                message: "Can only roll back completed operations".to_string(),
            });
        }

        info!("triggering rollback for operation {operation_id}");
        let outcome = self
            .pipeline
            .rollback_operation(operation_id, meta.bot_id)
            .await?;

        if outcome.success {
            if let Some(mut report) = self.completed.get_mut(operation_id) {
                report.rollback_performed = true;
            }
        }
        Ok(outcome)
    }

    /// Cancel a queued or running operation.
    pub fn cancel(&self, operation_id: &str) -> bool {
        if let Some(running) = self.running.get(operation_id) {
            running.cancel.cancel();
            drop(running);
            self.pipeline.cancel_operation(operation_id);
            info!("cancelled running operation {operation_id}");
            return true;
        }

        let removed = {
            let mut queues = self.queues.lock();
            queues.values_mut().any(|queue| {
                queue
                    .iter()
                    .position(|op| op.operation_id == operation_id)
                    .map(|index| queue.remove(index))
                    .is_some()
            })
        };

        if removed {
            self.metadata.remove(operation_id);
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
            info!("cancelled queued operation {operation_id}");
        }
        removed
    }

    /// Suspend dequeueing; running operations continue.
    pub fn pause(&self) {
        *self.status.write() = QueueStatus::Paused;
        info!("reprocessing queue paused");
    }

    /// Resume dequeueing after a pause.
    pub fn resume(&self) {
        let mut status = self.status.write();
        if *status == QueueStatus::Paused {
            *status = QueueStatus::Idle;
            info!("reprocessing queue resumed");
        }
    }

    /// Current scheduler state.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        *self.status.read()
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn statistics(&self) -> QueueStatistics {
        let times = self.counters.processing_times.lock();
        let average_processing_time = if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        };
        drop(times);

        let waits = self.wait_times.lock();
        let average_wait_time = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<f64>() / waits.len() as f64
        };
        drop(waits);

        let running = self.running.len();
        QueueStatistics {
            total_operations: self.counters.total_enqueued.load(Ordering::SeqCst),
            queued_operations: self.queued_count(),
            running_operations: running,
            completed_operations: self.counters.completed.load(Ordering::SeqCst),
            failed_operations: self.counters.failed.load(Ordering::SeqCst),
            cancelled_operations: self.counters.cancelled.load(Ordering::SeqCst),
            average_processing_time,
            average_wait_time,
            resource_utilization: running as f64 / self.config.max_concurrent_operations as f64,
        }
    }

    /// Detailed queue status: per-priority depth with previews, running
    /// operations with elapsed time, statistics.
    #[must_use]
    pub fn queue_status(&self) -> serde_json::Value {
        let mut queue_details = serde_json::Map::new();
        {
            let queues = self.queues.lock();
            for priority in OperationPriority::DESCENDING {
                let queue = queues.get(&priority);
                let operations: Vec<serde_json::Value> = queue
                    .map(|q| {
                        q.iter()
                            .take(5)
                            .map(|op| {
                                serde_json::json!({
                                    "operation_id": op.operation_id,
                                    "bot_id": op.bot_id.to_string(),
                                    "queued_at": op.queued_at,
                                    "estimated_duration": op.estimated_duration,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                queue_details.insert(
                    format!("{priority:?}").to_uppercase(),
                    serde_json::json!({
                        "count": queue.map_or(0, VecDeque::len),
                        "operations": operations,
                    }),
                );
            }
        }

        let now = now_epoch();
        let running: serde_json::Map<String, serde_json::Value> = self
            .running
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    serde_json::json!({
                        "started_at": e.value().started_at,
                        "running_time": now - e.value().started_at,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "queue_status": self.status(),
            "statistics": self.statistics(),
            "queue_details": queue_details,
            "running_operations": running,
            "max_concurrent_operations": self.config.max_concurrent_operations,
            "max_queue_size": self.config.max_queue_size,
        })
    }

    /// Drain and stop: cancel the scheduler and every running operation,
    /// then wait for their tasks to terminate.
    pub async fn shutdown(&self) {
        info!("shutting down reprocessing queue manager");
        *self.status.write() = QueueStatus::ShuttingDown;
        self.shutdown.cancel();

        let operation_ids: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        for operation_id in &operation_ids {
            if let Some(running) = self.running.get(operation_id) {
                running.cancel.cancel();
            }
            self.pipeline.cancel_operation(operation_id);
            info!("cancelled operation {operation_id} during shutdown");
        }

        for operation_id in operation_ids {
            if let Some((_, running)) = self.running.remove(&operation_id) {
                if let Err(err) = running.handle.await {
                    if !err.is_cancelled() {
                        warn!("operation task ended abnormally: {err}");
                    }
                }
            }
        }

        info!("reprocessing queue manager shutdown complete");
    }
}

fn timeout_report(operation: &QueuedOperation, timeout: Duration) -> ReprocessingReport {
    ReprocessingReport {
        operation_id: operation.operation_id.clone(),
        bot_id: operation.bot_id,
        status: ReprocessingStatus::Failed,
        total_documents: 0,
        successful_documents: 0,
        failed_documents: 0,
        cancelled_documents: 0,
        total_chunks_processed: 0,
        total_chunks_stored: 0,
        processing_time: timeout.as_secs_f64(),
        started_at: operation.started_at.unwrap_or_else(now_epoch),
        ended_at: now_epoch(),
        errors: vec![OperationError {
            document_id: None,
            filename: None,
            error: "Operation timed out".to_string(),
            error_type: "timeout".to_string(),
        }],
        document_results: Vec::new(),
        integrity_verified: false,
        rollback_performed: false,
        backup_fallback: false,
        timed_out: true,
    }
}
