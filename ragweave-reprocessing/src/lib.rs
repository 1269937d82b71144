//! # ragweave-reprocessing
//!
//! The maintenance half of the ragweave core: safe, resumable document
//! reprocessing against a tenant's corpus.
//!
//! This crate provides:
//! - `snapshot`: checksum-bearing data snapshots with durable storage
//! - `integrity`: six structural consistency checks across the
//!   repositories and the vector store
//! - `rollback`: planned, recoverable rollback to a snapshot
//! - `checkpoint`: durable checkpoints for resuming interrupted runs
//! - `processor`: the document parsing capability seam
//! - `pipeline`: the batched, error-isolated reprocessing pipeline
//! - `queue`: the priority-scheduled operation queue

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Durable operation checkpoints
pub mod checkpoint;

/// Structural integrity checks
pub mod integrity;

/// Reprocessing pipeline
pub mod pipeline;

/// Document processing capability
pub mod processor;

/// Priority operation queue
pub mod queue;

/// Rollback planning and execution
pub mod rollback;

/// Data snapshots
pub mod snapshot;

/// Chunk + vector write path with deduplication
pub mod storage_engine;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use integrity::{
    IntegrityCheck, IntegrityCheckResult, IntegrityIssue, IntegrityService, IssueLevel,
};
pub use pipeline::{
    DocumentOutcome, PipelineConfig, ReprocessOptions, ReprocessingPhase, ReprocessingPipeline,
    ReprocessingProgress, ReprocessingReport, ReprocessingStatus,
};
pub use processor::{DocumentProcessor, ParsedChunk, PlainTextProcessor};
pub use queue::{OperationPriority, QueueConfig, QueueStatistics, ReprocessingQueueManager};
pub use rollback::{RollbackAction, RollbackOutcome, RollbackPlan, RollbackService};
pub use snapshot::{Snapshot, SnapshotService};
