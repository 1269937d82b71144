//! Unified credential resolution: bot owner first, caller fallback
//!
//! All retrieval, generation and reprocessing paths obtain provider keys
//! through the resolver. Validation results are cached per
//! `provider:sha256(key)[..8]` with a TTL; concurrent resolutions for the
//! same key coalesce on that cache.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragweave_core::error::{ApiKeyErrorKind, RagweaveError, Result};
use ragweave_core::hash::sha256_prefix;
use ragweave_core::retry::RetryPolicy;
use ragweave_storage::repository::{BotStore, UserKeyStore};

use crate::errors::{categorize_failure, composite_message, provider_info, ApiKeyFailure};
use crate::registry::ProviderRegistry;

/// Which stored key satisfied the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The bot owner's stored key
    BotOwner,
    /// The requesting user's stored key
    Caller,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BotOwner => f.write_str("bot_owner"),
            Self::Caller => f.write_str("caller"),
        }
    }
}

/// A successfully resolved API key.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// The usable key
    pub api_key: String,
    /// Where it came from
    pub source: KeySource,
    /// Provider the key is for (may differ from the requested provider
    /// after alternative-provider fallback)
    pub provider: String,
    /// Whether the validation verdict came from the cache
    pub cached: bool,
    /// Strategies attempted before this one succeeded
    pub fallback_chain: Vec<String>,
}

/// Result of a non-destructive availability probe.
#[derive(Debug, Clone)]
pub struct AvailabilityCheck {
    /// Whether any source holds a valid key
    pub available: bool,
    /// Sources that were examined
    pub sources_checked: Vec<KeySource>,
    /// Sources holding a validated key
    pub valid_sources: Vec<KeySource>,
    /// Provider checked
    pub provider: String,
    /// Configuration suggestions for the caller
    pub recommendations: Vec<String>,
}

/// Resolver tunables.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Validation-cache entry lifetime
    pub validation_cache_ttl: Duration,
    /// Deadline for one live validation call
    pub validation_timeout: Duration,
    /// Live validation attempts before giving up
    pub validation_attempts: u32,
    /// Backoff for the terminal retry strategy
    pub fallback_retry: RetryPolicy,
    /// Alternative-provider fallback table, tried in order
    pub alternative_providers: HashMap<String, Vec<String>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let mut alternative_providers = HashMap::new();
        alternative_providers.insert("openai".to_string(), vec!["gemini".to_string()]);
        alternative_providers.insert("gemini".to_string(), vec!["openai".to_string()]);
        alternative_providers.insert(
            "anthropic".to_string(),
            vec!["openai".to_string(), "gemini".to_string()],
        );

        Self {
            validation_cache_ttl: Duration::from_secs(15 * 60),
            validation_timeout: Duration::from_secs(10),
            validation_attempts: 2,
            fallback_retry: RetryPolicy {
                attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                backoff_factor: 2.0,
            },
            alternative_providers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    valid: bool,
    cached_at: Instant,
}

/// Owner-first / caller-fallback credential resolver with validation
/// caching and categorized error recovery.
pub struct CredentialResolver {
    bots: Arc<dyn BotStore>,
    user_keys: Arc<dyn UserKeyStore>,
    registry: Arc<ProviderRegistry>,
    validation_cache: DashMap<String, CachedVerdict>,
    config: ResolverConfig,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("cache_entries", &self.validation_cache.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    /// Create a resolver over the given stores and provider registry.
    #[must_use]
    pub fn new(
        bots: Arc<dyn BotStore>,
        user_keys: Arc<dyn UserKeyStore>,
        registry: Arc<ProviderRegistry>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            bots,
            user_keys,
            registry,
            validation_cache: DashMap::new(),
            config,
        }
    }

    fn cache_key(provider: &str, api_key: &str) -> String {
        format!("{provider}:{}", sha256_prefix(api_key, 8))
    }

    fn is_cache_live(&self, verdict: &CachedVerdict) -> bool {
        verdict.cached_at.elapsed() < self.config.validation_cache_ttl
    }

    fn evict_expired(&self) {
        let ttl = self.config.validation_cache_ttl;
        self.validation_cache
            .retain(|_, verdict| verdict.cached_at.elapsed() < ttl);
    }

    /// Validate a key, preferring a cached verdict within the TTL.
    ///
    /// Live validation runs against the provider's key check with a
    /// deadline and at most `validation_attempts` attempts with
    /// progressive delay. Definitive verdicts (valid or invalid) are
    /// cached; transport failures are not.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiKeyFailure`] when no definitive verdict could be
    /// obtained.
    pub async fn validate_with_cache(
        &self,
        provider: &str,
        api_key: &str,
    ) -> std::result::Result<(bool, bool), ApiKeyFailure> {
        let cache_key = Self::cache_key(provider, api_key);

        if let Some(verdict) = self.validation_cache.get(&cache_key) {
            if self.is_cache_live(&verdict) {
                debug!("validation cache hit for {provider}: {}", verdict.valid);
                return Ok((verdict.valid, true));
            }
        }

        let Some(instance) = self.registry.embedding(provider) else {
            return Err(categorize_failure(
                provider,
                &format!("no embedding provider registered for {provider}"),
            ));
        };

        let mut last_failure = None;
        for attempt in 0..self.config.validation_attempts.max(1) {
            let outcome = tokio::time::timeout(
                self.config.validation_timeout,
                instance.validate_key(api_key),
            )
            .await;

            match outcome {
                Ok(Ok(valid)) => {
                    // Opportunistic cleanup piggybacks on writes
                    self.evict_expired();
                    self.validation_cache.insert(
                        cache_key,
                        CachedVerdict {
                            valid,
                            cached_at: Instant::now(),
                        },
                    );
                    return Ok((valid, false));
                }
                Ok(Err(err)) => {
                    warn!("validation attempt {} failed for {provider}: {err}", attempt + 1);
                    last_failure = Some(categorize_failure(provider, &err.to_string()));
                }
                Err(_) => {
                    warn!("validation attempt {} timed out for {provider}", attempt + 1);
                    last_failure = Some(categorize_failure(
                        provider,
                        &format!(
                            "API key validation timed out after {:.0}s",
                            self.config.validation_timeout.as_secs_f64()
                        ),
                    ));
                }
            }

            if attempt + 1 < self.config.validation_attempts {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            categorize_failure(provider, "API key validation failed with no diagnostics")
        }))
    }

    /// Resolve a key using the unified strategy: bot owner first, then
    /// the requesting user.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist; an `ApiKey` error with an
    /// owner/caller-aware message when no source yields a usable key.
    pub async fn resolve(
        &self,
        bot_id: Uuid,
        caller_id: Uuid,
        provider: &str,
        validate: bool,
    ) -> Result<ResolvedKey> {
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        // Strategy 1: bot owner's key
        let owner_key = self
            .user_keys
            .get_key(bot.owner_id, provider)
            .await
            .map_err(RagweaveError::storage)?;

        if let Some(api_key) = owner_key {
            match self.admit_key(provider, &api_key, validate).await {
                Some(cached) => {
                    info!("using bot owner's API key for {provider}");
                    return Ok(ResolvedKey {
                        api_key,
                        source: KeySource::BotOwner,
                        provider: provider.to_string(),
                        cached,
                        fallback_chain: vec!["bot_owner".to_string()],
                    });
                }
                None => warn!("bot owner's API key rejected for {provider}"),
            }
        }

        // Strategy 2: requesting user's key
        let caller_key = self
            .user_keys
            .get_key(caller_id, provider)
            .await
            .map_err(RagweaveError::storage)?;

        if let Some(api_key) = caller_key {
            match self.admit_key(provider, &api_key, validate).await {
                Some(cached) => {
                    info!("using requesting user's API key for {provider}");
                    return Ok(ResolvedKey {
                        api_key,
                        source: KeySource::Caller,
                        provider: provider.to_string(),
                        cached,
                        fallback_chain: vec!["bot_owner".to_string(), "caller".to_string()],
                    });
                }
                None => warn!("requesting user's API key rejected for {provider}"),
            }
        }

        Err(self.no_key_error(provider, bot.owner_id, caller_id))
    }

    /// Whether the key passes the validation rule; `Some(cached)` admits
    /// it, `None` rejects it.
    async fn admit_key(&self, provider: &str, api_key: &str, validate: bool) -> Option<bool> {
        if !validate {
            return Some(false);
        }
        match self.validate_with_cache(provider, api_key).await {
            Ok((true, cached)) => Some(cached),
            Ok((false, _)) | Err(_) => None,
        }
    }

    fn no_key_error(&self, provider: &str, owner_id: Uuid, caller_id: Uuid) -> RagweaveError {
        let info = provider_info(provider);
        let message = if owner_id == caller_id {
            format!(
                "No valid API key configured for {}. Please add your {} API key in your \
                 profile settings. You can get an API key from: {}",
                info.name, info.name, info.url
            )
        } else {
            format!(
                "No valid API key available for {}. Either the bot owner needs to configure \
                 their {} API key, or you can add your own {} API key in your profile \
                 settings. Get an API key from: {}",
                info.name, info.name, info.name, info.url
            )
        };
        let failure = categorize_failure(provider, &format!("no api key: {message}"));
        RagweaveError::ApiKey {
            kind: ApiKeyErrorKind::NotFound,
            provider: provider.to_string(),
            message,
            remediation: failure.remediation_steps,
        }
    }

    /// Resolve with the full recovery ladder: direct resolution, then
    /// retry without validation, then alternative providers, then
    /// exponential-backoff retries. All accumulated failures feed the
    /// terminal composite error.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing bot, or a composite `ApiKey` error listing
    /// deduplicated remediation steps when every strategy fails.
    pub async fn resolve_with_fallback(
        &self,
        bot_id: Uuid,
        caller_id: Uuid,
        provider: &str,
        validate: bool,
    ) -> Result<ResolvedKey> {
        let mut failures: Vec<ApiKeyFailure> = Vec::new();

        // Primary attempt
        match self.resolve(bot_id, caller_id, provider, validate).await {
            Ok(resolved) => return Ok(resolved),
            Err(RagweaveError::NotFound { resource, id }) => {
                return Err(RagweaveError::NotFound { resource, id });
            }
            Err(err) => failures.push(categorize_failure(provider, &err.to_string())),
        }

        // Strategy 1: skip validation
        if validate {
            info!("credential fallback: retrying {provider} without validation");
            if let Ok(mut resolved) = self.resolve(bot_id, caller_id, provider, false).await {
                warn!("using unvalidated API key for {provider}");
                resolved.fallback_chain.push("skip_validation".to_string());
                return Ok(resolved);
            }
        }

        // Strategy 2: alternative providers, same owner-first resolution
        let alternatives = self
            .config
            .alternative_providers
            .get(provider)
            .cloned()
            .unwrap_or_default();

        for alternative in &alternatives {
            info!("credential fallback: trying alternative provider {alternative}");
            match self.resolve(bot_id, caller_id, alternative, validate).await {
                Ok(mut resolved) => {
                    info!("resolved via alternative provider {alternative}");
                    resolved
                        .fallback_chain
                        .push(format!("alternative:{alternative}"));
                    return Ok(resolved);
                }
                Err(err) => {
                    failures.push(categorize_failure(alternative, &err.to_string()));
                }
            }
        }

        // Strategy 3: retry with exponential backoff, clearing the cache
        // each round so stale verdicts cannot mask recovery
        let retry = self.config.fallback_retry;
        let attempts = retry.attempts.max(1);
        for attempt in 0..attempts {
            self.clear_validation_cache(Some(provider));
            match self.resolve(bot_id, caller_id, provider, validate).await {
                Ok(mut resolved) => {
                    info!("credential retry succeeded on attempt {}", attempt + 1);
                    resolved
                        .fallback_chain
                        .push(format!("retry:{}", attempt + 1));
                    return Ok(resolved);
                }
                Err(err) => {
                    if attempt + 1 == attempts {
                        failures.push(categorize_failure(provider, &err.to_string()));
                    }
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(retry.delay_for(attempt)).await;
            }
        }

        let (message, remediation) = composite_message(provider, &failures);
        let kind = failures
            .first()
            .map_or(ApiKeyErrorKind::NotFound, |f| f.kind);

        Err(RagweaveError::ApiKey {
            kind,
            provider: provider.to_string(),
            message,
            remediation,
        })
    }

    /// Probe key availability without releasing a key.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist.
    pub async fn check_availability(
        &self,
        bot_id: Uuid,
        caller_id: Uuid,
        provider: &str,
    ) -> Result<AvailabilityCheck> {
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        let info = provider_info(provider);
        let mut sources_checked = vec![KeySource::BotOwner];
        let mut valid_sources = Vec::new();
        let mut recommendations = Vec::new();

        let owner_key = self
            .user_keys
            .get_key(bot.owner_id, provider)
            .await
            .map_err(RagweaveError::storage)?;

        match owner_key {
            Some(key) => match self.validate_with_cache(provider, &key).await {
                Ok((true, _)) => valid_sources.push(KeySource::BotOwner),
                _ => recommendations.push(format!(
                    "Bot owner's {} API key is invalid and needs to be updated",
                    info.name
                )),
            },
            None => recommendations.push(format!(
                "Bot owner should configure a {} API key for optimal performance",
                info.name
            )),
        }

        if caller_id != bot.owner_id {
            sources_checked.push(KeySource::Caller);
            let caller_key = self
                .user_keys
                .get_key(caller_id, provider)
                .await
                .map_err(RagweaveError::storage)?;

            match caller_key {
                Some(key) => match self.validate_with_cache(provider, &key).await {
                    Ok((true, _)) => valid_sources.push(KeySource::Caller),
                    _ => recommendations.push(format!(
                        "Your {} API key is invalid and needs to be updated",
                        info.name
                    )),
                },
                None => recommendations.push(format!(
                    "You can add your own {} API key as a fallback option",
                    info.name
                )),
            }
        }

        let available = !valid_sources.is_empty();
        if !available && recommendations.is_empty() {
            recommendations.push(format!(
                "Configure a valid {} API key to use this bot",
                info.name
            ));
        }

        Ok(AvailabilityCheck {
            available,
            sources_checked,
            valid_sources,
            provider: provider.to_string(),
            recommendations,
        })
    }

    /// Drop validation-cache entries, optionally only one provider's.
    /// Returns the number removed.
    pub fn clear_validation_cache(&self, provider: Option<&str>) -> usize {
        match provider {
            None => {
                let count = self.validation_cache.len();
                self.validation_cache.clear();
                count
            }
            Some(provider) => {
                let prefix = format!("{provider}:");
                let before = self.validation_cache.len();
                self.validation_cache.retain(|key, _| !key.starts_with(&prefix));
                before - self.validation_cache.len()
            }
        }
    }

    /// Validation-cache statistics: (total entries, live entries,
    /// per-provider counts).
    #[must_use]
    pub fn cache_stats(&self) -> (usize, usize, HashMap<String, usize>) {
        let total = self.validation_cache.len();
        let mut live = 0;
        let mut per_provider: HashMap<String, usize> = HashMap::new();

        for entry in &self.validation_cache {
            if self.is_cache_live(entry.value()) {
                live += 1;
            }
            let provider = entry
                .key()
                .split(':')
                .next()
                .unwrap_or_default()
                .to_string();
            *per_provider.entry(provider).or_default() += 1;
        }

        (total, live, per_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEmbeddingProvider, MockLlmProvider};
    use ragweave_core::model::Bot;
    use ragweave_storage::memory::{MemoryBotStore, MemoryUserKeyStore};

    struct Fixture {
        resolver: CredentialResolver,
        bot: Bot,
        caller: Uuid,
        keys: Arc<MemoryUserKeyStore>,
        openai: Arc<MockEmbeddingProvider>,
    }

    async fn fixture(config: ResolverConfig) -> Fixture {
        let bots = Arc::new(MemoryBotStore::new());
        let keys = Arc::new(MemoryUserKeyStore::new());
        let openai = Arc::new(MockEmbeddingProvider::new("openai", 8));
        let gemini = Arc::new(MockEmbeddingProvider::new("gemini", 8));

        let registry = Arc::new(
            ProviderRegistry::new()
                .with_embedding(openai.clone())
                .with_embedding(gemini)
                .with_llm(Arc::new(MockLlmProvider::new("openai"))),
        );

        let owner = Uuid::new_v4();
        let bot = Bot::new(owner, "b", "openai", "text-embedding-3-small");
        bots.upsert(bot.clone()).await.unwrap();

        Fixture {
            resolver: CredentialResolver::new(bots, keys.clone(), registry, config),
            bot,
            caller: Uuid::new_v4(),
            keys,
            openai,
        }
    }

    #[tokio::test]
    async fn test_owner_key_preferred() {
        let f = fixture(ResolverConfig::default()).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "sk-owner")
            .await
            .unwrap();
        f.keys.set_key(f.caller, "openai", "sk-caller").await.unwrap();

        let resolved = f
            .resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert_eq!(resolved.source, KeySource::BotOwner);
        assert_eq!(resolved.api_key, "sk-owner");
    }

    #[tokio::test]
    async fn test_caller_fallback_when_owner_invalid() {
        let f = fixture(ResolverConfig::default()).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "invalid-key")
            .await
            .unwrap();
        f.keys.set_key(f.caller, "openai", "sk-caller").await.unwrap();
        f.openai.mark_invalid("invalid-key");

        let resolved = f
            .resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert_eq!(resolved.source, KeySource::Caller);
    }

    #[tokio::test]
    async fn test_missing_bot_is_not_found() {
        let f = fixture(ResolverConfig::default()).await;
        let err = f
            .resolver
            .resolve(Uuid::new_v4(), f.caller, "openai", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RagweaveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_validation_cache_hit() {
        let f = fixture(ResolverConfig::default()).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "sk-owner")
            .await
            .unwrap();

        let first = f
            .resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(f.openai.validation_calls(), 1);

        let second = f
            .resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(f.openai.validation_calls(), 1);
    }

    #[tokio::test]
    async fn test_validation_cache_ttl_expires() {
        let config = ResolverConfig {
            validation_cache_ttl: Duration::from_millis(20),
            ..ResolverConfig::default()
        };
        let f = fixture(config).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "sk-owner")
            .await
            .unwrap();

        f.resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let again = f
            .resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert!(!again.cached);
        assert_eq!(f.openai.validation_calls(), 2);
    }

    #[tokio::test]
    async fn test_alternative_provider_fallback() {
        let mut config = ResolverConfig::default();
        config.fallback_retry.attempts = 1;
        config.fallback_retry.initial_delay = Duration::from_millis(1);
        let f = fixture(config).await;
        // Only a gemini key exists anywhere
        f.keys
            .set_key(f.bot.owner_id, "gemini", "sk-gemini")
            .await
            .unwrap();

        let resolved = f
            .resolver
            .resolve_with_fallback(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();
        assert_eq!(resolved.provider, "gemini");
        assert!(resolved
            .fallback_chain
            .iter()
            .any(|s| s == "alternative:gemini"));
    }

    #[tokio::test]
    async fn test_composite_error_when_everything_fails() {
        let mut config = ResolverConfig::default();
        config.fallback_retry.attempts = 2;
        config.fallback_retry.initial_delay = Duration::from_millis(1);
        config.fallback_retry.max_delay = Duration::from_millis(2);
        let f = fixture(config).await;

        let err = f
            .resolver
            .resolve_with_fallback(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap_err();

        match err {
            RagweaveError::ApiKey {
                remediation,
                message,
                ..
            } => {
                assert!(message.contains("openai"));
                assert!(!remediation.is_empty());
                assert!(remediation.len() <= 5);
            }
            other => panic!("expected ApiKey error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_availability_check() {
        let f = fixture(ResolverConfig::default()).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "sk-owner")
            .await
            .unwrap();

        let check = f
            .resolver
            .check_availability(f.bot.id, f.caller, "openai")
            .await
            .unwrap();
        assert!(check.available);
        assert_eq!(check.valid_sources, vec![KeySource::BotOwner]);
        assert_eq!(
            check.sources_checked,
            vec![KeySource::BotOwner, KeySource::Caller]
        );
        // Caller has no key, so a fallback recommendation is present
        assert!(!check.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cache_by_provider() {
        let f = fixture(ResolverConfig::default()).await;
        f.keys
            .set_key(f.bot.owner_id, "openai", "sk-owner")
            .await
            .unwrap();
        f.resolver
            .resolve(f.bot.id, f.caller, "openai", true)
            .await
            .unwrap();

        assert_eq!(f.resolver.clear_validation_cache(Some("gemini")), 0);
        assert_eq!(f.resolver.clear_validation_cache(Some("openai")), 1);
    }
}
