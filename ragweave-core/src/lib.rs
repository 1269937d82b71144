//! # ragweave-core
//!
//! Domain model and shared primitives for the ragweave retrieval core.
//!
//! This crate provides:
//! - The error taxonomy every other crate converts into (`RagweaveError`)
//! - Domain entities: bots, documents, chunks, collection metadata,
//!   threshold performance records
//! - The explicit `RetryPolicy` primitive used wherever the system retries
//! - Hashing helpers shared by cache keys, query hashes and checksums

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Error taxonomy and result alias
pub mod error;

/// Domain entities
pub mod model;

/// Retry policy primitive
pub mod retry;

/// Hashing helpers
pub mod hash;

pub use error::{ApiKeyErrorKind, RagweaveError, Result};
pub use model::{
    Bot, Chunk, CollectionMetadata, CollectionStatus, Document, ThresholdPerformanceRecord,
};
pub use retry::RetryPolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
