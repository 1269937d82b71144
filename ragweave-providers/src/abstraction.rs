//! Capability traits the provider HTTP clients implement

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Generation parameters passed through to an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Optional system prompt
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            system_prompt: None,
        }
    }
}

/// Embedding provider capability.
///
/// Implementations wrap the provider's HTTP client; the core only sees
/// this surface. Batch size handling (providers accept at most 100 texts
/// per call) is the implementation's concern.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (openai, gemini, anthropic, openrouter, ...).
    fn name(&self) -> &str;

    /// Generate one embedding per input text, in order.
    ///
    /// # Errors
    ///
    /// Returns an error on authentication, rate-limit or transport
    /// failures; the message is fed to the API-key error categorizer.
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: &[String],
        api_key: &str,
    ) -> Result<Vec<Vec<f32>>>;

    /// Cheap live check that a key is usable.
    async fn validate_key(&self, api_key: &str) -> Result<bool>;

    /// Models the key grants access to.
    async fn list_models(&self, api_key: &str) -> Result<Vec<String>>;

    /// Vector dimension produced by a model.
    fn dimension(&self, model: &str) -> usize;
}

/// LLM provider capability.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Generate a completion for the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error on authentication, rate-limit or transport
    /// failures.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        api_key: &str,
        config: &GenerationConfig,
    ) -> Result<String>;

    /// Cheap live check that a key is usable.
    async fn validate_key(&self, api_key: &str) -> Result<bool>;

    /// Models the key grants access to.
    async fn list_models(&self, api_key: &str) -> Result<Vec<String>>;
}
