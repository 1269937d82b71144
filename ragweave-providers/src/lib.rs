//! # ragweave-providers
//!
//! Provider capability traits and unified credential resolution.
//!
//! This crate provides:
//! - `EmbeddingProvider` and `LlmProvider` capability traits — the seams
//!   the out-of-scope HTTP clients plug into
//! - A name-indexed `ProviderRegistry` for both capability kinds
//! - The `CredentialResolver`: owner-first / caller-fallback API-key
//!   resolution with a TTL'd validation cache, alternative-provider
//!   fallback and categorized, actionable errors
//! - Deterministic mock providers for tests

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Capability traits for embedding and LLM providers
pub mod abstraction;

/// Unified credential resolution
pub mod credentials;

/// API-key error categorization and remediation
pub mod errors;

/// Mock providers for tests
pub mod mock;

/// Provider registry
pub mod registry;

pub use abstraction::{EmbeddingProvider, GenerationConfig, LlmProvider};
pub use credentials::{
    AvailabilityCheck, CredentialResolver, KeySource, ResolvedKey, ResolverConfig,
};
pub use errors::{categorize_failure, provider_info, ApiKeyFailure, ProviderInfo};
pub use registry::ProviderRegistry;
