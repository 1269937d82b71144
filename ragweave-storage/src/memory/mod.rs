//! In-memory backends for every storage seam

mod kv;
mod repos;
mod vector;

pub use kv::MemoryKvStore;
pub use repos::{
    MemoryBotStore, MemoryChunkStore, MemoryCollectionMetadataStore, MemoryDocumentStore,
    MemoryPerformanceLogStore, MemoryUserKeyStore,
};
pub use vector::MemoryVectorStore;
