//! # ragweave-storage
//!
//! Storage seams for the ragweave core:
//! - `VectorStore`: the pluggable vector-index capability (collection
//!   lifecycle, upsert, thresholded similarity search)
//! - `KvStore`: the distributed cache tier behind the context-aware cache
//! - Repository ports standing in for the out-of-scope relational store
//!
//! In-memory backends ship for every seam. They are the default for tests
//! and for single-process deployments without external infrastructure;
//! production backends implement the same traits.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Vector store capability trait and types
pub mod vector;

/// Key-value store capability trait
pub mod kv;

/// Repository ports for relational entities
pub mod repository;

/// In-memory backends for every seam
pub mod memory;

pub use kv::KvStore;
pub use memory::{
    MemoryBotStore, MemoryChunkStore, MemoryCollectionMetadataStore, MemoryDocumentStore,
    MemoryKvStore, MemoryPerformanceLogStore, MemoryUserKeyStore, MemoryVectorStore,
};
pub use repository::{
    BotStore, ChunkStore, CollectionMetadataStore, DocumentStore, PerformanceLogStore,
    UserKeyStore,
};
pub use vector::{ChunkPayload, CollectionInfo, DistanceMetric, SearchHit, VectorPoint, VectorStore};
