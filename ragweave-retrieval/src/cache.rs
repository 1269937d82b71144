//! Context-aware two-tier response cache
//!
//! A local LRU map fronts an optional distributed KV tier. Cache keys are
//! context-sensitive (query, tenant, user, capped conversation depth and
//! stable context fields), TTLs adapt to temporal relevance, confidence
//! and content type, and reads are validated against context drift. A
//! maintenance sweep evicts expired entries and relieves memory pressure;
//! the strategy self-tunes from the observed hit rate.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragweave_core::hash::sha256_prefix;
use ragweave_storage::kv::KvStore;

use crate::analyzer::{QueryCharacteristics, QueryIntent};
use crate::blender::HybridResponse;
use crate::router::RetrievalMode;

/// Cache strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Cache everything, long TTLs
    Aggressive,
    /// Cache selectively, medium TTLs
    Moderate,
    /// Cache minimally, short TTLs
    Conservative,
    /// Adjust validation to usage patterns
    Adaptive,
    /// Weigh context heavily
    ContextSensitive,
}

/// Why an entry was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// TTL elapsed
    TtlExpired,
    /// A source document changed
    DocumentUpdated,
    /// The bot's configuration changed
    BotConfigChanged,
    /// Context drifted past the threshold
    ContextDrift,
    /// Explicit flush
    ManualFlush,
    /// Entry was not earning its keep
    LowHitRate,
    /// Evicted to relieve memory pressure
    MemoryPressure,
}

impl InvalidationReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::TtlExpired => "ttl_expired",
            Self::DocumentUpdated => "document_updated",
            Self::BotConfigChanged => "bot_config_changed",
            Self::ContextDrift => "context_drift",
            Self::ManualFlush => "manual_flush",
            Self::LowHitRate => "low_hit_rate",
            Self::MemoryPressure => "memory_pressure",
        }
    }
}

/// Stable context fields fed into key generation and drift detection.
pub type ContextMap = HashMap<String, serde_json::Value>;

/// A cached hybrid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Full cache key
    pub key: String,
    /// Blended answer text
    pub content: String,
    /// Mode that produced the answer
    pub mode_used: RetrievalMode,
    /// Source identifiers
    pub sources: Vec<String>,
    /// Short hash of the query
    pub query_hash: String,
    /// Short hash of the context at write time
    pub context_hash: String,
    /// Unix seconds at creation
    pub created_at: f64,
    /// Unix seconds at last access
    pub accessed_at: f64,
    /// Number of hits served
    pub access_count: u64,
    /// TTL in seconds
    pub ttl_secs: u64,
    /// Confidence of the cached response
    pub confidence_score: f32,
    /// Response metadata for reconstruction
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CachedEntry {
    /// Strictly expired: an entry exactly at its TTL no longer serves.
    #[must_use]
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.created_at >= self.ttl_secs as f64
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries in the local tier
    pub max_local_entries: usize,
    /// Memory cap for the local tier in megabytes
    pub max_memory_mb: usize,
    /// Base TTL in seconds before adaptive multipliers
    pub base_ttl_secs: u64,
    /// TTL floor in seconds
    pub min_ttl_secs: u64,
    /// TTL ceiling in seconds
    pub max_ttl_secs: u64,
    /// Context drift threshold for read invalidation
    pub drift_threshold: f64,
    /// Initial strategy
    pub strategy: CacheStrategy,
    /// Interval of the maintenance sweep
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_local_entries: 1000,
            max_memory_mb: 512,
            base_ttl_secs: 3600,
            min_ttl_secs: 300,
            max_ttl_secs: 86_400,
            drift_threshold: 0.3,
            strategy: CacheStrategy::Adaptive,
            maintenance_interval: Duration::from_secs(300),
        }
    }
}

/// Cache performance counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Served hits
    pub total_hits: u64,
    /// Misses
    pub total_misses: u64,
    /// LRU evictions on insert
    pub total_evictions: u64,
    /// Invalidations of all kinds
    pub total_invalidations: u64,
    /// Entries in the local tier
    pub entry_count: usize,
    /// Serialized size of the local tier in bytes
    pub cache_size_bytes: usize,
    /// Invalidation counts by reason
    pub invalidation_reasons: HashMap<String, u64>,
}

impl CacheStatistics {
    /// Hit rate over all lookups so far.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidationEvent {
    key: String,
    reason: InvalidationReason,
    at: f64,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Generate the context-aware cache key for a query.
///
/// Conversation depth is capped at 5 so deep threads still share keys;
/// only stable context fields participate. serde_json maps are sorted by
/// key, so the serialized form is canonical.
#[must_use]
pub fn generate_key(
    query: &str,
    bot_id: Uuid,
    user_id: Uuid,
    context: &ContextMap,
    conversation_depth: usize,
) -> String {
    let mut components = serde_json::Map::new();
    components.insert(
        "query".to_string(),
        serde_json::json!(query.to_lowercase().trim()),
    );
    components.insert("bot_id".to_string(), serde_json::json!(bot_id.to_string()));
    components.insert("user_id".to_string(), serde_json::json!(user_id.to_string()));
    components.insert(
        "conv_depth".to_string(),
        serde_json::json!(conversation_depth.min(5)),
    );

    let mut stable = serde_json::Map::new();
    for field in ["intent", "domain", "complexity_tier"] {
        if let Some(value) = context.get(field) {
            stable.insert(field.to_string(), value.clone());
        }
    }
    components.insert("context".to_string(), serde_json::Value::Object(stable));

    let serialized = serde_json::Value::Object(components).to_string();
    let digest = sha256_prefix(&serialized, 16);
    format!("hybrid_cache:{bot_id}:{digest}")
}

/// Short hash of a context map for drift comparison.
#[must_use]
pub fn context_hash(context: &ContextMap) -> String {
    let ordered: std::collections::BTreeMap<&String, &serde_json::Value> =
        context.iter().collect();
    let serialized = serde_json::to_string(&ordered).unwrap_or_default();
    sha256_prefix(&serialized, 8)
}

/// Build the stable context map from analyzed characteristics.
#[must_use]
pub fn context_from_characteristics(c: &QueryCharacteristics) -> ContextMap {
    let mut context = ContextMap::new();
    context.insert("intent".to_string(), serde_json::json!(c.intent.as_str()));
    context.insert(
        "domain".to_string(),
        serde_json::json!(c.domain_specificity),
    );
    context.insert(
        "complexity_tier".to_string(),
        serde_json::json!((c.complexity_score * 10.0).floor() / 10.0),
    );
    context
}

/// Detects when the conversational context has drifted away from what a
/// cached entry was built under.
#[derive(Debug)]
struct ContextDriftDetector {
    threshold: f64,
    history: Mutex<VecDeque<ContextMap>>,
}

impl ContextDriftDetector {
    fn new(threshold: f64) -> Self {
        Self {
            threshold,
            history: Mutex::new(VecDeque::with_capacity(10)),
        }
    }

    /// True when the current context differs from the cached hash and the
    /// drift score against recent history exceeds the threshold.
    fn detect(&self, current: &ContextMap, cached_hash: &str) -> bool {
        if context_hash(current) == cached_hash {
            return false;
        }
        self.drift_score(current) > self.threshold
    }

    fn drift_score(&self, current: &ContextMap) -> f64 {
        let mut history = self.history.lock();

        let score = if history.is_empty() {
            0.0
        } else {
            let sum: f64 = history
                .iter()
                .map(|past| Self::context_difference(current, past))
                .sum();
            sum / history.len() as f64
        };

        if history.len() >= 10 {
            history.pop_front();
        }
        history.push_back(current.clone());

        score
    }

    fn context_difference(a: &ContextMap, b: &ContextMap) -> f64 {
        let keys: std::collections::HashSet<&String> = a.keys().chain(b.keys()).collect();
        if keys.is_empty() {
            return 0.0;
        }

        let mut diff = 0.0;
        for key in &keys {
            let va = a.get(*key);
            let vb = b.get(*key);
            if va == vb {
                continue;
            }
            match (va.and_then(serde_json::Value::as_f64), vb.and_then(serde_json::Value::as_f64)) {
                (Some(x), Some(y)) => {
                    diff += (x - y).abs() / x.abs().max(y.abs()).max(1.0);
                }
                _ => diff += 1.0,
            }
        }
        diff / keys.len() as f64
    }
}

/// Adaptive TTL calculator.
#[derive(Debug, Clone)]
struct AdaptiveTtl {
    base_secs: f64,
    min_secs: u64,
    max_secs: u64,
}

impl AdaptiveTtl {
    fn calculate(&self, temporal_relevance: f32, confidence: f32, content_type: &str) -> u64 {
        let mut ttl = self.base_secs;

        if temporal_relevance > 0.7 {
            ttl *= 0.25;
        } else if temporal_relevance > 0.4 {
            ttl *= 0.5;
        }

        if confidence > 0.9 {
            ttl *= 1.5;
        } else if confidence < 0.5 {
            ttl *= 0.5;
        }

        let content_multiplier = match content_type {
            "factual" => 2.0,
            "conversational" => 0.3,
            "creative" => 0.5,
            _ => 1.0,
        };
        ttl *= content_multiplier;

        (ttl as u64).clamp(self.min_secs, self.max_secs)
    }
}

fn content_type_of(intent: QueryIntent) -> &'static str {
    match intent {
        QueryIntent::FactualLookup | QueryIntent::TechnicalExplanation => "factual",
        QueryIntent::Conversational | QueryIntent::Clarification | QueryIntent::FollowUp => {
            "conversational"
        }
        QueryIntent::CreativeGeneration => "creative",
        _ => "analytical",
    }
}

/// Context-aware two-tier cache for hybrid responses.
pub struct ContextAwareCache {
    local: RwLock<HashMap<String, CachedEntry>>,
    kv: Option<Arc<dyn KvStore>>,
    strategy: RwLock<CacheStrategy>,
    ttl: RwLock<AdaptiveTtl>,
    drift: ContextDriftDetector,
    stats: RwLock<CacheStatistics>,
    journal: Mutex<VecDeque<InvalidationEvent>>,
    config: CacheConfig,
}

impl std::fmt::Debug for ContextAwareCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAwareCache")
            .field("entries", &self.local.read().len())
            .field("strategy", &*self.strategy.read())
            .field("has_kv", &self.kv.is_some())
            .finish_non_exhaustive()
    }
}

impl ContextAwareCache {
    /// Create a cache; `kv` is the optional distributed tier.
    #[must_use]
    pub fn new(kv: Option<Arc<dyn KvStore>>, config: CacheConfig) -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            kv,
            strategy: RwLock::new(config.strategy),
            ttl: RwLock::new(AdaptiveTtl {
                base_secs: config.base_ttl_secs as f64,
                min_secs: config.min_ttl_secs,
                max_secs: config.max_ttl_secs,
            }),
            drift: ContextDriftDetector::new(config.drift_threshold),
            stats: RwLock::new(CacheStatistics::default()),
            journal: Mutex::new(VecDeque::with_capacity(100)),
            config,
        }
    }

    /// Current strategy.
    #[must_use]
    pub fn strategy(&self) -> CacheStrategy {
        *self.strategy.read()
    }

    /// Look up a cached response for the query and context.
    ///
    /// Invalid entries (expired, drifted, or idle under the adaptive
    /// strategy) are invalidated on the spot and read as a miss.
    pub async fn get(
        &self,
        query: &str,
        bot_id: Uuid,
        user_id: Uuid,
        context: &ContextMap,
        conversation_depth: usize,
    ) -> Option<CachedEntry> {
        let key = generate_key(query, bot_id, user_id, context, conversation_depth);
        let now = now_epoch();

        let local_entry = self.local.read().get(&key).cloned();
        if let Some(entry) = local_entry {
            match self.validate_entry(&entry, context, now) {
                Ok(()) => {
                    {
                        let mut local = self.local.write();
                        if let Some(live) = local.get_mut(&key) {
                            live.accessed_at = now;
                            live.access_count += 1;
                        }
                    }
                    self.stats.write().total_hits += 1;
                    debug!("cache hit for {key}");
                    return Some(entry);
                }
                Err(reason) => {
                    self.invalidate_entry(&key, reason).await;
                }
            }
        }

        if let Some(kv) = &self.kv {
            match kv.get(&key).await {
                Ok(Some(bytes)) => {
                    if let Ok(mut entry) = serde_json::from_slice::<CachedEntry>(&bytes) {
                        match self.validate_entry(&entry, context, now) {
                            Ok(()) => {
                                entry.accessed_at = now;
                                entry.access_count += 1;
                                self.insert_local(key.clone(), entry.clone());
                                self.stats.write().total_hits += 1;
                                debug!("distributed cache hit for {key}");
                                return Some(entry);
                            }
                            Err(reason) => {
                                self.invalidate_entry(&key, reason).await;
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("distributed cache read failed: {err}"),
            }
        }

        self.stats.write().total_misses += 1;
        debug!("cache miss for {key}");
        None
    }

    /// Cache a response; returns whether it was stored.
    pub async fn set(
        &self,
        query: &str,
        bot_id: Uuid,
        user_id: Uuid,
        response: &HybridResponse,
        context: &ContextMap,
        characteristics: &QueryCharacteristics,
    ) -> bool {
        if !self.should_cache(response, characteristics) {
            debug!("response not suitable for caching");
            return false;
        }

        let key = generate_key(
            query,
            bot_id,
            user_id,
            context,
            characteristics.conversation_depth,
        );

        let ttl_secs = self.ttl.read().calculate(
            characteristics.temporal_relevance,
            response.confidence_score,
            content_type_of(characteristics.intent),
        );

        let now = now_epoch();
        let entry = CachedEntry {
            key: key.clone(),
            content: response.content.clone(),
            mode_used: response.mode_used,
            sources: response.sources_used.clone(),
            query_hash: sha256_prefix(query, 8),
            context_hash: context_hash(context),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl_secs,
            confidence_score: response.confidence_score,
            metadata: response.metadata.clone(),
        };

        self.insert_local(key.clone(), entry.clone());

        if let Some(kv) = &self.kv {
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(err) = kv
                        .set_with_ttl(&key, bytes, Duration::from_secs(ttl_secs))
                        .await
                    {
                        warn!("distributed cache write failed: {err}");
                    }
                }
                Err(err) => warn!("cache entry serialization failed: {err}"),
            }
        }

        debug!("cached response with TTL {ttl_secs}s: {key}");
        true
    }

    fn should_cache(&self, response: &HybridResponse, c: &QueryCharacteristics) -> bool {
        if response.confidence_score < 0.3 {
            return false;
        }
        if c.intent == QueryIntent::Conversational && c.conversation_depth < 2 {
            return false;
        }
        if response
            .metadata
            .get("no_cache")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return false;
        }

        if *self.strategy.read() == CacheStrategy::Conservative {
            if response.confidence_score < 0.7 {
                return false;
            }
            if c.temporal_relevance > 0.5 {
                return false;
            }
        }

        true
    }

    fn validate_entry(
        &self,
        entry: &CachedEntry,
        context: &ContextMap,
        now: f64,
    ) -> std::result::Result<(), InvalidationReason> {
        if entry.is_expired(now) {
            return Err(InvalidationReason::TtlExpired);
        }

        if !context.is_empty()
            && !entry.context_hash.is_empty()
            && self.drift.detect(context, &entry.context_hash)
        {
            return Err(InvalidationReason::ContextDrift);
        }

        if *self.strategy.read() == CacheStrategy::Adaptive && entry.access_count > 5 {
            let age = (now - entry.created_at).max(1.0);
            let hit_rate = entry.access_count as f64 / age;
            if hit_rate < 0.001 {
                return Err(InvalidationReason::LowHitRate);
            }
        }

        Ok(())
    }

    fn insert_local(&self, key: String, entry: CachedEntry) {
        let mut local = self.local.write();

        if local.len() >= self.config.max_local_entries && !local.contains_key(&key) {
            // Evict the least recently used entry
            if let Some(oldest) = local
                .iter()
                .min_by(|a, b| {
                    a.1.accessed_at
                        .partial_cmp(&b.1.accessed_at)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(k, _)| k.clone())
            {
                local.remove(&oldest);
                self.stats.write().total_evictions += 1;
                debug!("evicted from local cache: {oldest}");
            }
        }

        local.insert(key, entry);
    }

    async fn invalidate_entry(&self, key: &str, reason: InvalidationReason) {
        self.local.write().remove(key);

        if let Some(kv) = &self.kv {
            if let Err(err) = kv.delete(key).await {
                warn!("distributed cache delete failed: {err}");
            }
        }

        {
            let mut stats = self.stats.write();
            stats.total_invalidations += 1;
            *stats
                .invalidation_reasons
                .entry(reason.as_str().to_string())
                .or_default() += 1;
        }

        let mut journal = self.journal.lock();
        if journal.len() >= 100 {
            journal.pop_front();
        }
        journal.push_back(InvalidationEvent {
            key: key.to_string(),
            reason,
            at: now_epoch(),
        });

        debug!("invalidated cache entry {key} ({})", reason.as_str());
    }

    /// Invalidate every entry belonging to a bot. Returns the count
    /// removed from the local tier.
    pub async fn invalidate_bot(&self, bot_id: Uuid) -> usize {
        let prefix = format!("hybrid_cache:{bot_id}:");

        let keys: Vec<String> = self
            .local
            .read()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();

        for key in &keys {
            self.invalidate_entry(key, InvalidationReason::BotConfigChanged)
                .await;
        }

        if let Some(kv) = &self.kv {
            match kv.delete_prefix(&prefix).await {
                Ok(removed) => debug!("removed {removed} distributed entries for bot {bot_id}"),
                Err(err) => warn!("distributed prefix invalidation failed: {err}"),
            }
        }

        info!("invalidated {} cache entries for bot {bot_id}", keys.len());
        keys.len()
    }

    /// Invalidate entries for one document.
    ///
    /// The cache does not track chunk-to-document provenance, so this
    /// degrades to bot-wide invalidation.
    pub async fn invalidate_document(&self, bot_id: Uuid, document_id: Uuid) -> usize {
        let removed = self.invalidate_bot(bot_id).await;
        info!("invalidated cache for document {document_id} in bot {bot_id} (bot-wide)");
        removed
    }

    /// Flush every entry from both tiers. Returns the count removed from
    /// the local tier.
    pub async fn flush(&self) -> usize {
        let keys: Vec<String> = self.local.read().keys().cloned().collect();
        for key in &keys {
            self.invalidate_entry(key, InvalidationReason::ManualFlush).await;
        }

        if let Some(kv) = &self.kv {
            if let Err(err) = kv.delete_prefix("hybrid_cache:").await {
                warn!("distributed cache flush failed: {err}");
            }
        }

        info!("flushed {} cache entries", keys.len());
        keys.len()
    }

    /// One maintenance sweep: drop expired entries, then relieve memory
    /// pressure by evicting the bottom 20 % of entries by access rate
    /// when the serialized size exceeds the configured cap.
    pub async fn run_maintenance(&self) {
        let now = now_epoch();

        let expired: Vec<String> = self
            .local
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.invalidate_entry(key, InvalidationReason::TtlExpired).await;
        }

        let size_bytes: usize = self
            .local
            .read()
            .values()
            .map(|entry| serde_json::to_vec(entry).map(|b| b.len()).unwrap_or(0))
            .sum();

        let max_bytes = self.config.max_memory_mb * 1024 * 1024;
        if size_bytes > max_bytes {
            let mut by_rate: Vec<(String, f64)> = self
                .local
                .read()
                .iter()
                .map(|(key, entry)| {
                    let age = (now - entry.created_at).max(1.0);
                    (key.clone(), entry.access_count as f64 / age)
                })
                .collect();
            by_rate.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            let evict_count = by_rate.len() / 5;
            for (key, _) in by_rate.into_iter().take(evict_count) {
                self.invalidate_entry(&key, InvalidationReason::MemoryPressure)
                    .await;
            }
        }

        let entry_count = self.local.read().len();
        {
            let mut stats = self.stats.write();
            stats.entry_count = entry_count;
            stats.cache_size_bytes = size_bytes;
        }

        let stats = self.stats.read().clone();
        info!(
            "cache maintenance: {} expired, hit_rate={:.2}, size={:.1}MB",
            expired.len(),
            stats.hit_rate(),
            size_bytes as f64 / 1024.0 / 1024.0
        );
    }

    /// Self-tune the strategy and base TTL from observed behavior.
    pub fn self_tune(&self) {
        let stats = self.stats.read().clone();
        let hit_rate = stats.hit_rate();
        let lookups = stats.total_hits + stats.total_misses;

        if lookups > 0 {
            let mut strategy = self.strategy.write();
            if hit_rate < 0.3 && *strategy != CacheStrategy::Conservative {
                info!("low hit rate ({hit_rate:.2}), switching to conservative strategy");
                *strategy = CacheStrategy::Conservative;
            } else if hit_rate > 0.7 && *strategy != CacheStrategy::Aggressive {
                info!("high hit rate ({hit_rate:.2}), switching to aggressive strategy");
                *strategy = CacheStrategy::Aggressive;
            }
        }

        let drift_invalidations = stats
            .invalidation_reasons
            .get(InvalidationReason::ContextDrift.as_str())
            .copied()
            .unwrap_or(0);
        if drift_invalidations > 50 {
            let mut ttl = self.ttl.write();
            ttl.base_secs = (ttl.base_secs * 0.8).max(600.0);
            info!("high context drift, reduced base TTL to {:.0}s", ttl.base_secs);
        }
    }

    /// Spawn the periodic maintenance task; cancels with the token.
    pub fn spawn_maintenance(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.config.maintenance_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        cache.run_maintenance().await;
                        cache.self_tune();
                    }
                }
            }
        })
    }

    /// Snapshot of the performance counters.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        let mut stats = self.stats.read().clone();
        stats.entry_count = self.local.read().len();
        stats
    }

    /// The most recent invalidation events (newest last, at most ten).
    #[must_use]
    pub fn recent_invalidations(&self) -> Vec<(String, InvalidationReason, f64)> {
        let journal = self.journal.lock();
        journal
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|event| (event.key.clone(), event.reason, event.at))
            .collect()
    }

    /// Recommend a strategy from recent performance figures.
    #[must_use]
    pub fn recommend_strategy(hit_rate: f64, temporal_content_ratio: f64) -> CacheStrategy {
        if hit_rate > 0.7 && temporal_content_ratio < 0.3 {
            CacheStrategy::Aggressive
        } else if hit_rate > 0.5 {
            CacheStrategy::Moderate
        } else if temporal_content_ratio > 0.6 {
            CacheStrategy::Conservative
        } else {
            CacheStrategy::Adaptive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::QueryAnalyzer;
    use ragweave_storage::memory::MemoryKvStore;

    fn response(confidence: f32) -> HybridResponse {
        HybridResponse {
            content: "cached answer".to_string(),
            mode_used: RetrievalMode::HybridBalanced,
            sources_used: vec!["LLM".to_string()],
            confidence_score: confidence,
            information_density: crate::blender::InformationDensity::Medium,
            processing_time: 0.1,
            document_contribution: 0.5,
            llm_contribution: 0.5,
            metadata: HashMap::new(),
        }
    }

    fn characteristics(query: &str) -> QueryCharacteristics {
        QueryAnalyzer::new().analyze(query, &[], None)
    }

    fn cache_with_kv() -> (Arc<ContextAwareCache>, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = Arc::new(ContextAwareCache::new(
            Some(kv.clone()),
            CacheConfig::default(),
        ));
        (cache, kv)
    }

    #[test]
    fn test_key_caps_conversation_depth() {
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let context = ContextMap::new();

        let deep = generate_key("q", bot, user, &context, 12);
        let capped = generate_key("q", bot, user, &context, 5);
        let shallow = generate_key("q", bot, user, &context, 1);

        assert_eq!(deep, capped);
        assert_ne!(deep, shallow);
        assert!(deep.starts_with(&format!("hybrid_cache:{bot}:")));
    }

    #[test]
    fn test_key_normalizes_query() {
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let context = ContextMap::new();

        assert_eq!(
            generate_key("  What IS this? ", bot, user, &context, 0),
            generate_key("what is this?", bot, user, &context, 0)
        );
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let (cache, _) = cache_with_kv();
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is the api limit");
        let context = context_from_characteristics(&c);

        let stored = cache
            .set("what is the api limit", bot, user, &response(0.8), &context, &c)
            .await;
        assert!(stored);

        let hit = cache
            .get("what is the api limit", bot, user, &context, 0)
            .await
            .expect("expected cache hit");
        assert_eq!(hit.content, "cached answer");
        assert_eq!(cache.statistics().total_hits, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_not_cached() {
        let (cache, _) = cache_with_kv();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        let stored = cache
            .set("what is x", Uuid::new_v4(), Uuid::new_v4(), &response(0.2), &context, &c)
            .await;
        assert!(!stored);
    }

    #[tokio::test]
    async fn test_shallow_conversational_not_cached() {
        let (cache, _) = cache_with_kv();
        let c = characteristics("hello there");
        assert_eq!(c.intent, QueryIntent::Conversational);
        let context = context_from_characteristics(&c);

        let stored = cache
            .set("hello there", Uuid::new_v4(), Uuid::new_v4(), &response(0.9), &context, &c)
            .await;
        assert!(!stored);
    }

    #[tokio::test]
    async fn test_no_cache_marker_respected() {
        let (cache, _) = cache_with_kv();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);
        let mut resp = response(0.9);
        resp.metadata
            .insert("no_cache".to_string(), serde_json::json!(true));

        assert!(
            !cache
                .set("what is x", Uuid::new_v4(), Uuid::new_v4(), &resp, &context, &c)
                .await
        );
    }

    #[tokio::test]
    async fn test_conservative_rules() {
        let config = CacheConfig {
            strategy: CacheStrategy::Conservative,
            ..CacheConfig::default()
        };
        let cache = ContextAwareCache::new(None, config);
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        // Confidence below 0.7 rejected under conservative
        assert!(
            !cache
                .set("what is x", Uuid::new_v4(), Uuid::new_v4(), &response(0.6), &context, &c)
                .await
        );
        assert!(
            cache
                .set("what is x", Uuid::new_v4(), Uuid::new_v4(), &response(0.8), &context, &c)
                .await
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_with_reason() {
        let (cache, _) = cache_with_kv();
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        cache
            .set("what is x", bot, user, &response(0.8), &context, &c)
            .await;

        // Force expiry by rewriting the entry's creation time
        {
            let mut local = cache.local.write();
            for entry in local.values_mut() {
                entry.created_at -= entry.ttl_secs as f64; // exactly at TTL
            }
        }

        assert!(cache.get("what is x", bot, user, &context, 0).await.is_none());
        let stats = cache.statistics();
        assert_eq!(
            stats.invalidation_reasons.get("ttl_expired").copied(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_invalidate_bot_then_miss() {
        let (cache, kv) = cache_with_kv();
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        cache
            .set("what is x", bot, user, &response(0.8), &context, &c)
            .await;
        assert_eq!(cache.invalidate_bot(bot).await, 1);
        assert!(cache.get("what is x", bot, user, &context, 0).await.is_none());
        assert!(kv
            .scan_prefix(&format!("hybrid_cache:{bot}:"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_flush_clears_everything() {
        let (cache, kv) = cache_with_kv();
        let user = Uuid::new_v4();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        for _ in 0..3 {
            cache
                .set("what is x", Uuid::new_v4(), user, &response(0.8), &context, &c)
                .await;
        }

        assert_eq!(cache.flush().await, 3);
        assert!(kv.scan_prefix("hybrid_cache:").await.unwrap().is_empty());
        let stats = cache.statistics();
        assert_eq!(stats.invalidation_reasons.get("manual_flush").copied(), Some(3));
    }

    #[tokio::test]
    async fn test_document_invalidation_degrades_to_bot_wide() {
        let (cache, _) = cache_with_kv();
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is x");
        let context = context_from_characteristics(&c);

        cache
            .set("what is x", bot, user, &response(0.8), &context, &c)
            .await;
        let removed = cache.invalidate_document(bot, Uuid::new_v4()).await;
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let config = CacheConfig {
            max_local_entries: 2,
            ..CacheConfig::default()
        };
        let cache = ContextAwareCache::new(None, config);
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is alpha");
        let context = context_from_characteristics(&c);

        for query in ["q one", "q two", "q three"] {
            cache
                .set(query, bot, user, &response(0.8), &context, &c)
                .await;
        }

        assert_eq!(cache.local.read().len(), 2);
        assert_eq!(cache.statistics().total_evictions, 1);
    }

    #[tokio::test]
    async fn test_maintenance_memory_pressure() {
        let config = CacheConfig {
            max_memory_mb: 0, // any content exceeds the cap
            ..CacheConfig::default()
        };
        let cache = ContextAwareCache::new(None, config);
        let bot = Uuid::new_v4();
        let user = Uuid::new_v4();
        let c = characteristics("what is alpha");
        let context = context_from_characteristics(&c);

        for i in 0..10 {
            cache
                .set(&format!("query {i}"), bot, user, &response(0.8), &context, &c)
                .await;
        }

        cache.run_maintenance().await;
        // Bottom 20% of 10 entries evicted
        assert_eq!(cache.local.read().len(), 8);
        let stats = cache.statistics();
        assert_eq!(
            stats.invalidation_reasons.get("memory_pressure").copied(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_self_tuning_strategy_switch() {
        let (cache, _) = cache_with_kv();

        // Record misses only
        for _ in 0..10 {
            cache
                .get("nothing", Uuid::new_v4(), Uuid::new_v4(), &ContextMap::new(), 0)
                .await;
        }
        cache.self_tune();
        assert_eq!(cache.strategy(), CacheStrategy::Conservative);
    }

    #[test]
    fn test_adaptive_ttl_math() {
        let ttl = AdaptiveTtl {
            base_secs: 3600.0,
            min_secs: 300,
            max_secs: 86_400,
        };

        // Highly temporal content caches briefly: 3600 * 0.25 = 900
        assert_eq!(ttl.calculate(0.8, 0.7, "analytical"), 900);
        // Factual doubles: 3600 * 2
        assert_eq!(ttl.calculate(0.0, 0.7, "factual"), 7200);
        // Confidence boost: 3600 * 1.5 * 2
        assert_eq!(ttl.calculate(0.0, 0.95, "factual"), 10_800);
        // Floors at min_ttl: 3600 * 0.25 * 0.5 * 0.3 = 135 -> 300
        assert_eq!(ttl.calculate(0.8, 0.4, "conversational"), 300);
    }

    #[test]
    fn test_drift_detector() {
        let detector = ContextDriftDetector::new(0.3);

        let mut stable = ContextMap::new();
        stable.insert("intent".to_string(), serde_json::json!("factual_lookup"));
        stable.insert("complexity_tier".to_string(), serde_json::json!(0.2));

        let hash = context_hash(&stable);
        // Identical context never drifts
        assert!(!detector.detect(&stable, &hash));

        // Seed history with the stable context; a stale hash forces the
        // score computation but the context itself has not moved
        for _ in 0..3 {
            assert!(!detector.detect(&stable, "stalehash"));
        }

        let mut shifted = ContextMap::new();
        shifted.insert("intent".to_string(), serde_json::json!("creative_generation"));
        shifted.insert("complexity_tier".to_string(), serde_json::json!(0.9));

        assert!(detector.detect(&shifted, &hash));
    }

    #[test]
    fn test_strategy_recommendation() {
        assert_eq!(
            ContextAwareCache::recommend_strategy(0.8, 0.1),
            CacheStrategy::Aggressive
        );
        assert_eq!(
            ContextAwareCache::recommend_strategy(0.6, 0.5),
            CacheStrategy::Moderate
        );
        assert_eq!(
            ContextAwareCache::recommend_strategy(0.1, 0.7),
            CacheStrategy::Conservative
        );
        assert_eq!(
            ContextAwareCache::recommend_strategy(0.1, 0.1),
            CacheStrategy::Adaptive
        );
    }
}
