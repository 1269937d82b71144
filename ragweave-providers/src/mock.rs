//! Deterministic mock providers for tests
//!
//! The embedding mock hashes each text into a fixed-dimension unit vector
//! so identical texts always embed identically; the LLM mock echoes a
//! canned completion. Both track call counts and can be told to reject
//! specific keys, fail outright, or respond slowly.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::abstraction::{EmbeddingProvider, GenerationConfig, LlmProvider};

/// Mock embedding provider producing deterministic hash-based vectors.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    name: String,
    dimension: usize,
    invalid_keys: RwLock<HashSet<String>>,
    fail_embeddings: RwLock<bool>,
    response_delay: RwLock<Duration>,
    validation_calls: AtomicUsize,
    embedding_calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// Create a mock for the given provider name and dimension.
    #[must_use]
    pub fn new(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            invalid_keys: RwLock::new(HashSet::new()),
            fail_embeddings: RwLock::new(false),
            response_delay: RwLock::new(Duration::ZERO),
            validation_calls: AtomicUsize::new(0),
            embedding_calls: AtomicUsize::new(0),
        }
    }

    /// Treat the given key as invalid from now on.
    pub fn mark_invalid(&self, api_key: &str) {
        self.invalid_keys.write().insert(api_key.to_string());
    }

    /// Make `generate_embeddings` fail until reset.
    pub fn set_fail_embeddings(&self, fail: bool) {
        *self.fail_embeddings.write() = fail;
    }

    /// Delay every call by the given duration.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.write() = delay;
    }

    /// Number of `validate_key` calls so far.
    pub fn validation_calls(&self) -> usize {
        self.validation_calls.load(Ordering::SeqCst)
    }

    /// Number of `generate_embeddings` calls so far.
    pub fn embedding_calls(&self) -> usize {
        self.embedding_calls.load(Ordering::SeqCst)
    }

    /// Deterministic unit vector for a text.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let digest = ragweave_core::hash::sha256_hex(text);
        let bytes = digest.as_bytes();
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| f32::from(bytes[i % bytes.len()]) / 255.0 - 0.5)
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    async fn pause(&self) {
        let delay = *self.response_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_embeddings(
        &self,
        _model: &str,
        texts: &[String],
        api_key: &str,
    ) -> Result<Vec<Vec<f32>>> {
        self.pause().await;
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail_embeddings.read() {
            bail!("{} embedding endpoint unavailable", self.name);
        }
        if self.invalid_keys.read().contains(api_key) {
            bail!("401 unauthorized: invalid api key");
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn validate_key(&self, api_key: &str) -> Result<bool> {
        self.pause().await;
        self.validation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.invalid_keys.read().contains(api_key))
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<String>> {
        Ok(vec![format!("{}-default-model", self.name)])
    }

    fn dimension(&self, _model: &str) -> usize {
        self.dimension
    }
}

/// Mock LLM provider echoing a canned completion.
#[derive(Debug)]
pub struct MockLlmProvider {
    name: String,
    response: RwLock<String>,
    fail: RwLock<bool>,
    response_delay: RwLock<Duration>,
    generate_calls: AtomicUsize,
}

impl MockLlmProvider {
    /// Create a mock for the given provider name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: RwLock::new("This is a generated answer.".to_string()),
            fail: RwLock::new(false),
            response_delay: RwLock::new(Duration::ZERO),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Set the canned completion.
    pub fn set_response(&self, response: &str) {
        *self.response.write() = response.to_string();
    }

    /// Make `generate` fail until reset.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.write() = fail;
    }

    /// Delay every call by the given duration.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.write() = delay;
    }

    /// Number of `generate` calls so far.
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _api_key: &str,
        _config: &GenerationConfig,
    ) -> Result<String> {
        let delay = *self.response_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.generate_calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail.read() {
            bail!("{} generation endpoint unavailable", self.name);
        }
        Ok(self.response.read().clone())
    }

    async fn validate_key(&self, _api_key: &str) -> Result<bool> {
        Ok(true)
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<String>> {
        Ok(vec![format!("{}-chat-model", self.name)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embeddings_deterministic_and_normalized() {
        let mock = MockEmbeddingProvider::new("openai", 16);
        let a = mock
            .generate_embeddings("m", &["hello".to_string()], "k")
            .await
            .unwrap();
        let b = mock
            .generate_embeddings("m", &["hello".to_string()], "k")
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let mock = MockEmbeddingProvider::new("openai", 4);
        mock.mark_invalid("bad");
        assert!(!mock.validate_key("bad").await.unwrap());
        assert!(mock.validate_key("good").await.unwrap());
        assert!(mock
            .generate_embeddings("m", &["x".to_string()], "bad")
            .await
            .is_err());
    }
}
