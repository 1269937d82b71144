//! # ragweave-retrieval
//!
//! The query-answering half of the ragweave core.
//!
//! This crate provides:
//! - `thresholds`: provider-aware similarity threshold management with
//!   performance logging and optimization recommendations
//! - `engine`: the adaptive retrieval engine (threshold cascade around
//!   vector search)
//! - `analyzer`: query characteristic analysis (intent, complexity,
//!   specificity, temporal/domain signals)
//! - `router`: adaptive mode routing with a learning loop
//! - `blender`: the six response synthesis strategies
//! - `cache`: the context-aware two-tier response cache
//! - `orchestrator`: the hybrid orchestrator tying everything together

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Query characteristic analysis
pub mod analyzer;

/// Response blending strategies
pub mod blender;

/// Context-aware response cache
pub mod cache;

/// Adaptive retrieval engine
pub mod engine;

/// Hybrid orchestrator
pub mod orchestrator;

/// Adaptive mode routing
pub mod router;

/// Similarity threshold management
pub mod thresholds;

pub use analyzer::{QueryAnalyzer, QueryCharacteristics, QueryIntent};
pub use blender::{HybridResponse, InformationDensity, ResponseBlender, SynthesisStrategy};
pub use cache::{CacheConfig, CacheStrategy, ContextAwareCache, InvalidationReason};
pub use engine::{AdaptiveRetrievalEngine, RetrievalContext, RetrievalOutcome, RetrievedChunk};
pub use orchestrator::{HybridOrchestrator, OrchestratorConfig, QueryRequest};
pub use router::{RetrievalDecision, RetrievalMode, RoutingStrategy};
pub use thresholds::{ThresholdConfig, ThresholdManager, ThresholdRecommendation};
