//! Name-indexed registry of provider instances

use std::collections::HashMap;
use std::sync::Arc;

use crate::abstraction::{EmbeddingProvider, LlmProvider};

/// Registry mapping provider names to live instances of both capability
/// kinds. Built once at startup; immutable afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    embedding: HashMap<String, Arc<dyn EmbeddingProvider>>,
    llm: HashMap<String, Arc<dyn LlmProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("embedding", &self.embedding.keys().collect::<Vec<_>>())
            .field("llm", &self.llm.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an embedding provider under its own name.
    #[must_use]
    pub fn with_embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding.insert(provider.name().to_string(), provider);
        self
    }

    /// Register an LLM provider under its own name.
    #[must_use]
    pub fn with_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm.insert(provider.name().to_string(), provider);
        self
    }

    /// Look up an embedding provider by name.
    #[must_use]
    pub fn embedding(&self, name: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.embedding.get(name).cloned()
    }

    /// Look up an LLM provider by name.
    #[must_use]
    pub fn llm(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.llm.get(name).cloned()
    }

    /// Names with a registered embedding provider.
    #[must_use]
    pub fn embedding_names(&self) -> Vec<String> {
        self.embedding.keys().cloned().collect()
    }
}
