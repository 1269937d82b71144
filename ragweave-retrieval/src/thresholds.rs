//! Provider-aware similarity threshold management
//!
//! Similarity score distributions differ wildly between embedding
//! providers (gemini scores cluster near zero; openai scores near 0.7),
//! so thresholds, retry cascades and adjustment steps are configured per
//! provider. Every retrieval attempt is logged; the recommendation engine
//! mines the log for better defaults.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::hash::sha256_hex;
use ragweave_core::model::ThresholdPerformanceRecord;
use ragweave_storage::repository::PerformanceLogStore;

use crate::engine::RetrievalContext;

/// Why a threshold differed from the provider default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// The previous attempt returned zero results
    NoResultsFound,
    /// Results existed but scored poorly
    LowQualityResults,
    /// Recommendation-driven tuning
    PerformanceOptimization,
    /// Content-type adjustment was applied
    ContentAnalysis,
    /// Provider-specific default shaping
    ProviderCharacteristics,
}

impl AdjustmentReason {
    /// Stable string form persisted into performance logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoResultsFound => "no_results_found",
            Self::LowQualityResults => "low_quality_results",
            Self::PerformanceOptimization => "performance_optimization",
            Self::ContentAnalysis => "content_analysis",
            Self::ProviderCharacteristics => "provider_characteristics",
        }
    }
}

/// Per-provider threshold configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThresholdConfig {
    /// Provider name
    pub provider: String,
    /// Default model the seed values were tuned for
    pub model: String,
    /// Default similarity threshold
    pub default_threshold: f32,
    /// Lowest threshold worth using
    pub min_threshold: f32,
    /// Highest threshold worth using
    pub max_threshold: f32,
    /// Step used when building custom retry cascades
    pub adjustment_step: f32,
    /// Seed retry cascade; `None` means "no threshold"
    pub retry_thresholds: Vec<Option<f32>>,
    /// Content-type tag to threshold delta
    pub content_type_adjustments: HashMap<String, f32>,
    /// Embedding dimension of the default model
    pub embedding_dimension: usize,
    /// Range thresholds usually perform well in
    pub optimal_range: (f32, f32),
}

impl ThresholdConfig {
    fn adjustments(pairs: &[(&str, f32)]) -> HashMap<String, f32> {
        pairs
            .iter()
            .map(|(tag, delta)| ((*tag).to_string(), *delta))
            .collect()
    }
}

fn seed_configs() -> HashMap<String, ThresholdConfig> {
    let mut configs = HashMap::new();

    configs.insert(
        "openai".to_string(),
        ThresholdConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            default_threshold: 0.7,
            min_threshold: 0.3,
            max_threshold: 0.95,
            adjustment_step: 0.1,
            retry_thresholds: vec![Some(0.7), Some(0.5), Some(0.3), Some(0.1)],
            content_type_adjustments: ThresholdConfig::adjustments(&[
                ("technical", 0.05),
                ("conversational", -0.05),
                ("code", 0.1),
                ("legal", 0.08),
            ]),
            embedding_dimension: 1536,
            optimal_range: (0.6, 0.8),
        },
    );

    // Gemini similarity scores are typically very low; the whole scale
    // shifts accordingly.
    configs.insert(
        "gemini".to_string(),
        ThresholdConfig {
            provider: "gemini".to_string(),
            model: "text-embedding-004".to_string(),
            default_threshold: 0.01,
            min_threshold: 0.001,
            max_threshold: 0.5,
            adjustment_step: 0.01,
            retry_thresholds: vec![Some(0.01), Some(0.005), Some(0.001), None],
            content_type_adjustments: ThresholdConfig::adjustments(&[
                ("technical", 0.005),
                ("conversational", -0.002),
                ("code", 0.01),
                ("legal", 0.008),
            ]),
            embedding_dimension: 768,
            optimal_range: (0.005, 0.05),
        },
    );

    configs.insert(
        "anthropic".to_string(),
        ThresholdConfig {
            provider: "anthropic".to_string(),
            model: "claude-3-haiku".to_string(),
            default_threshold: 0.6,
            min_threshold: 0.2,
            max_threshold: 0.9,
            adjustment_step: 0.1,
            retry_thresholds: vec![Some(0.6), Some(0.4), Some(0.2), Some(0.1)],
            content_type_adjustments: ThresholdConfig::adjustments(&[
                ("technical", 0.05),
                ("conversational", -0.05),
                ("code", 0.1),
                ("legal", 0.08),
            ]),
            embedding_dimension: 1024,
            optimal_range: (0.5, 0.75),
        },
    );

    configs.insert(
        "openrouter".to_string(),
        ThresholdConfig {
            provider: "openrouter".to_string(),
            model: "text-embedding-3-small".to_string(),
            default_threshold: 0.7,
            min_threshold: 0.3,
            max_threshold: 0.95,
            adjustment_step: 0.1,
            retry_thresholds: vec![Some(0.7), Some(0.5), Some(0.3), Some(0.1)],
            content_type_adjustments: ThresholdConfig::adjustments(&[
                ("technical", 0.05),
                ("conversational", -0.05),
                ("code", 0.1),
                ("legal", 0.08),
            ]),
            embedding_dimension: 1536,
            optimal_range: (0.6, 0.8),
        },
    );

    configs
}

/// Recommendation to change a bot's default threshold.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThresholdRecommendation {
    /// Threshold in effect today
    pub current_threshold: f32,
    /// Suggested replacement
    pub recommended_threshold: f32,
    /// Confidence in the suggestion, capped at 0.95
    pub confidence: f32,
    /// Human-readable justification
    pub reason: String,
    /// Samples the analysis was based on
    pub samples_analyzed: usize,
}

/// Aggregated retrieval performance for a bot over a window.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PerformanceSummary {
    /// Queries in the window
    pub total_queries: usize,
    /// Fraction that returned results
    pub success_rate: f64,
    /// Mean results per query
    pub avg_results_per_query: f64,
    /// Mean wall time per query in seconds
    pub avg_processing_time: f64,
    /// The threshold used most often, if any
    pub most_used_threshold: Option<f32>,
    /// Attempt counts per threshold
    pub threshold_distribution: HashMap<String, usize>,
}

/// Threshold manager: configs, optimal-threshold math, cascades,
/// performance tracking and recommendations.
pub struct ThresholdManager {
    configs: HashMap<String, ThresholdConfig>,
    logs: Arc<dyn PerformanceLogStore>,
    min_samples_for_optimization: usize,
}

impl std::fmt::Debug for ThresholdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdManager")
            .field("providers", &self.configs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ThresholdManager {
    /// Create a manager with the seed provider configurations.
    #[must_use]
    pub fn new(logs: Arc<dyn PerformanceLogStore>) -> Self {
        Self {
            configs: seed_configs(),
            logs,
            min_samples_for_optimization: 10,
        }
    }

    /// Supported provider names.
    #[must_use]
    pub fn supported_providers(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Configuration for a provider, with the model name substituted.
    ///
    /// # Errors
    ///
    /// `Validation` when the provider is not supported.
    pub fn config_for(&self, provider: &str, model: Option<&str>) -> Result<ThresholdConfig> {
        let config = self
            .configs
            .get(provider)
            .ok_or_else(|| RagweaveError::Validation {
                message: format!("Unsupported provider: {provider}"),
            })?;

        let mut config = config.clone();
        if let Some(model) = model {
            if model != config.model {
                config.model = model.to_string();
            }
        }
        Ok(config)
    }

    /// Optimal threshold for the retrieval context:
    /// `default + content_adjust + doc_count_adjust + doc_length_adjust`,
    /// clamped to `[min, max]`.
    #[must_use]
    pub fn calculate_optimal(
        &self,
        provider: &str,
        model: &str,
        context: &RetrievalContext,
    ) -> f32 {
        let Ok(config) = self.config_for(provider, Some(model)) else {
            error!("cannot calculate threshold for unsupported provider {provider}");
            return 0.5;
        };

        let mut threshold = config.default_threshold;

        if let Some(content_type) = &context.content_type {
            if let Some(delta) = config.content_type_adjustments.get(content_type) {
                threshold += delta;
                debug!("content-type adjustment for {content_type}: {delta}");
            }
        }

        // Bigger corpora get slightly more selective
        if context.document_count > 1000 {
            threshold += 0.05;
        } else if context.document_count > 100 {
            threshold += 0.02;
        }

        // Longer documents produce more specific chunks
        if let Some(avg_len) = context.avg_document_length {
            if avg_len > 5000.0 {
                threshold -= 0.05;
            } else if avg_len > 2000.0 {
                threshold -= 0.02;
            }
        }

        let clamped = threshold.clamp(config.min_threshold, config.max_threshold);
        debug!(
            "optimal threshold for {provider}/{model}: {clamped} (base {})",
            config.default_threshold
        );
        clamped
    }

    /// Cascade of thresholds to try in order; `None` means no threshold.
    ///
    /// With an initial threshold, steps down by `adjustment_step` to the
    /// provider minimum and appends the no-threshold fallback; otherwise
    /// the provider's seed cascade is returned.
    #[must_use]
    pub fn retry_thresholds(
        &self,
        provider: &str,
        model: &str,
        initial: Option<f32>,
    ) -> Vec<Option<f32>> {
        let Ok(config) = self.config_for(provider, Some(model)) else {
            return vec![Some(0.5), Some(0.3), Some(0.1), None];
        };

        match initial {
            Some(start) => {
                let mut cascade = vec![Some(start)];
                let mut current = start;
                while current - config.adjustment_step >= config.min_threshold {
                    current -= config.adjustment_step;
                    cascade.push(Some(current));
                }
                if cascade.last() != Some(&Some(config.min_threshold)) {
                    cascade.push(Some(config.min_threshold));
                }
                cascade.push(None);
                cascade
            }
            None => config.retry_thresholds.clone(),
        }
    }

    /// Validate a custom threshold; returns `(is_valid, issues)`.
    ///
    /// Out-of-range values are invalid; out-of-optimal-range values and
    /// high gemini thresholds produce advisory issues only.
    #[must_use]
    pub fn validate_threshold(
        &self,
        provider: &str,
        model: &str,
        custom_threshold: f32,
    ) -> (bool, Vec<String>) {
        let Ok(config) = self.config_for(provider, Some(model)) else {
            return (false, vec![format!("Unsupported provider: {provider}")]);
        };

        let mut issues = Vec::new();
        let mut valid = true;

        if custom_threshold < config.min_threshold {
            valid = false;
            issues.push(format!(
                "Threshold {custom_threshold} is below minimum {} for {provider}/{model}",
                config.min_threshold
            ));
        }
        if custom_threshold > config.max_threshold {
            valid = false;
            issues.push(format!(
                "Threshold {custom_threshold} is above maximum {} for {provider}/{model}",
                config.max_threshold
            ));
        }

        let (lo, hi) = config.optimal_range;
        if custom_threshold < lo || custom_threshold > hi {
            issues.push(format!(
                "Threshold {custom_threshold} is outside optimal range [{lo}, {hi}] for {provider}/{model}"
            ));
        }

        if provider == "gemini" && custom_threshold > 0.1 {
            issues.push(format!(
                "Gemini embeddings typically require very low thresholds (< 0.1). \
                 Consider using {} instead.",
                config.default_threshold
            ));
        }

        (valid, issues)
    }

    /// Append one performance log row for a retrieval attempt.
    ///
    /// Failures are logged and swallowed: tracking must never fail a
    /// retrieval.
    #[allow(clippy::too_many_arguments)]
    pub async fn track_performance(
        &self,
        bot_id: Uuid,
        threshold_used: f32,
        provider: &str,
        model: &str,
        query_text: &str,
        result_scores: &[f32],
        processing_time: f64,
        success: bool,
        adjustment_reason: Option<AdjustmentReason>,
    ) {
        let (avg, max, min, std_dev) = score_stats(result_scores);

        let record = ThresholdPerformanceRecord {
            bot_id,
            timestamp: Utc::now(),
            threshold_used,
            provider: provider.to_string(),
            model: model.to_string(),
            query_length: query_text.len(),
            query_hash: sha256_hex(query_text),
            results_found: result_scores.len(),
            avg_score: avg,
            max_score: max,
            min_score: min,
            score_std_dev: std_dev,
            processing_time,
            success,
            adjustment_reason: adjustment_reason.map(|r| r.as_str().to_string()),
        };

        if let Err(err) = self.logs.append(record).await {
            error!("failed to record retrieval performance: {err}");
        }
    }

    /// Mine the performance log for a better default threshold.
    ///
    /// Requires at least 10 samples in the lookback window. Each observed
    /// threshold gets a composite score
    /// `0.4·success_rate + 0.3·min(avg_results/5, 1) + 0.2·avg_score +
    /// 0.1·max(0, 1 − avg_time/5)`; a recommendation is emitted when the
    /// best threshold differs from the default by more than 0.05.
    /// Independently, > 30 % zero-result queries triggers a
    /// lower-threshold recommendation.
    ///
    /// # Errors
    ///
    /// `Storage` when the performance log cannot be read.
    pub async fn recommendations(
        &self,
        bot_id: Uuid,
        provider: &str,
        model: &str,
        lookback_days: i64,
    ) -> Result<Vec<ThresholdRecommendation>> {
        let config = self.config_for(provider, Some(model))?;
        let since = Utc::now() - ChronoDuration::days(lookback_days);

        let records: Vec<ThresholdPerformanceRecord> = self
            .logs
            .list_since(bot_id, since)
            .await
            .map_err(RagweaveError::storage)?
            .into_iter()
            .filter(|r| r.provider == provider && r.model == model)
            .collect();

        if records.len() < self.min_samples_for_optimization {
            return Ok(Vec::new());
        }

        #[derive(Default)]
        struct Bucket {
            successes: usize,
            results: usize,
            score_sum: f64,
            time_sum: f64,
            count: usize,
        }

        let mut buckets: HashMap<String, (f32, Bucket)> = HashMap::new();
        for record in &records {
            let key = format!("{:.4}", record.threshold_used);
            let (_, bucket) = buckets
                .entry(key)
                .or_insert_with(|| (record.threshold_used, Bucket::default()));
            bucket.successes += usize::from(record.success);
            bucket.results += record.results_found;
            bucket.score_sum += f64::from(record.avg_score.unwrap_or(0.0));
            bucket.time_sum += record.processing_time;
            bucket.count += 1;
        }

        let mut best: Option<(f32, f64, usize)> = None;
        for (threshold, bucket) in buckets.values() {
            let count = bucket.count as f64;
            let success_rate = bucket.successes as f64 / count;
            let avg_results = bucket.results as f64 / count;
            let avg_score = bucket.score_sum / count;
            let avg_time = bucket.time_sum / count;

            let composite = success_rate * 0.4
                + (avg_results / 5.0).min(1.0) * 0.3
                + avg_score * 0.2
                + (1.0 - avg_time / 5.0).max(0.0) * 0.1;

            if best.map_or(true, |(_, score, _)| composite > score) {
                best = Some((*threshold, composite, bucket.count));
            }
        }

        let mut recommendations = Vec::new();

        if let Some((best_threshold, best_score, bucket_count)) = best {
            if (best_threshold - config.default_threshold).abs() > 0.05 {
                recommendations.push(ThresholdRecommendation {
                    current_threshold: config.default_threshold,
                    recommended_threshold: best_threshold,
                    confidence: (best_score as f32).min(0.95),
                    reason: format!(
                        "Performance analysis shows {best_threshold:.3} performs better"
                    ),
                    samples_analyzed: bucket_count,
                });
            }
        }

        let no_results = records.iter().filter(|r| r.results_found == 0).count();
        if no_results as f64 > records.len() as f64 * 0.3 {
            let lower = (config.default_threshold - 0.2).max(config.min_threshold);
            recommendations.push(ThresholdRecommendation {
                current_threshold: config.default_threshold,
                recommended_threshold: lower,
                confidence: 0.8,
                reason: "High rate of queries with no results - consider lowering threshold"
                    .to_string(),
                samples_analyzed: records.len(),
            });
        }

        Ok(recommendations)
    }

    /// Aggregate retrieval performance for a bot over the last `days`.
    ///
    /// # Errors
    ///
    /// `Storage` when the performance log cannot be read.
    pub async fn performance_summary(
        &self,
        bot_id: Uuid,
        days: i64,
    ) -> Result<PerformanceSummary> {
        let since = Utc::now() - ChronoDuration::days(days);
        let records = self
            .logs
            .list_since(bot_id, since)
            .await
            .map_err(RagweaveError::storage)?;

        if records.is_empty() {
            return Ok(PerformanceSummary {
                total_queries: 0,
                success_rate: 0.0,
                avg_results_per_query: 0.0,
                avg_processing_time: 0.0,
                most_used_threshold: None,
                threshold_distribution: HashMap::new(),
            });
        }

        let total = records.len();
        let successes = records.iter().filter(|r| r.success).count();
        let results: usize = records.iter().map(|r| r.results_found).sum();
        let time: f64 = records.iter().map(|r| r.processing_time).sum();

        let mut distribution: HashMap<String, usize> = HashMap::new();
        let mut most_used: Option<(f32, usize)> = None;
        for record in &records {
            let key = format!("{:.4}", record.threshold_used);
            let count = distribution.entry(key).or_default();
            *count += 1;
            if most_used.map_or(true, |(_, n)| *count > n) {
                most_used = Some((record.threshold_used, *count));
            }
        }

        Ok(PerformanceSummary {
            total_queries: total,
            success_rate: successes as f64 / total as f64,
            avg_results_per_query: results as f64 / total as f64,
            avg_processing_time: time / total as f64,
            most_used_threshold: most_used.map(|(t, _)| t),
            threshold_distribution: distribution,
        })
    }
}

fn score_stats(scores: &[f32]) -> (Option<f32>, Option<f32>, Option<f32>, Option<f32>) {
    if scores.is_empty() {
        return (None, None, None, None);
    }

    let count = scores.len() as f32;
    let avg = scores.iter().sum::<f32>() / count;
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let std_dev = if scores.len() < 2 {
        0.0
    } else {
        let variance = scores.iter().map(|s| (s - avg).powi(2)).sum::<f32>() / count;
        variance.sqrt()
    };

    (Some(avg), Some(max), Some(min), Some(std_dev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragweave_storage::memory::MemoryPerformanceLogStore;

    fn manager() -> (ThresholdManager, Arc<MemoryPerformanceLogStore>) {
        let logs = Arc::new(MemoryPerformanceLogStore::new());
        (ThresholdManager::new(logs.clone()), logs)
    }

    fn context(docs: usize, avg_len: Option<f64>, content: Option<&str>) -> RetrievalContext {
        RetrievalContext {
            bot_id: Uuid::new_v4(),
            query_text: String::new(),
            content_type: content.map(ToString::to_string),
            document_count: docs,
            avg_document_length: avg_len,
        }
    }

    #[test]
    fn test_seed_configs() {
        let (manager, _) = manager();
        let openai = manager.config_for("openai", None).unwrap();
        assert!((openai.default_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(
            openai.retry_thresholds,
            vec![Some(0.7), Some(0.5), Some(0.3), Some(0.1)]
        );

        let gemini = manager.config_for("gemini", None).unwrap();
        assert!((gemini.default_threshold - 0.01).abs() < f32::EPSILON);
        assert_eq!(gemini.retry_thresholds.last(), Some(&None));

        assert!(manager.config_for("cohere", None).is_err());
    }

    #[test]
    fn test_optimal_threshold_adjustments() {
        let (manager, _) = manager();
        let base = manager.calculate_optimal("openai", "m", &context(10, None, None));
        assert!((base - 0.7).abs() < 1e-6);

        let technical = manager.calculate_optimal("openai", "m", &context(10, None, Some("technical")));
        assert!((technical - 0.75).abs() < 1e-6);

        let big_corpus = manager.calculate_optimal("openai", "m", &context(150, None, None));
        assert!((big_corpus - 0.72).abs() < 1e-6);

        let long_docs = manager.calculate_optimal("openai", "m", &context(10, Some(6000.0), None));
        assert!((long_docs - 0.65).abs() < 1e-6);

        // Clamped at max
        let stacked = manager.calculate_optimal("openai", "m", &context(2000, None, Some("code")));
        assert!(stacked <= 0.95);
    }

    #[test]
    fn test_custom_retry_cascade() {
        let (manager, _) = manager();
        let cascade = manager.retry_thresholds("openai", "m", Some(0.6));
        assert_eq!(cascade[0], Some(0.6));
        // Steps down by 0.1 to the minimum, then no-threshold
        assert_eq!(cascade.last(), Some(&None));
        let numeric: Vec<f32> = cascade.iter().flatten().copied().collect();
        assert!((numeric.last().copied().unwrap() - 0.3).abs() < 1e-6);
        for pair in numeric.windows(2) {
            assert!(pair[1] < pair[0]);
        }
    }

    #[test]
    fn test_validate_threshold() {
        let (manager, _) = manager();

        let (valid, issues) = manager.validate_threshold("openai", "m", 0.7);
        assert!(valid);
        assert!(issues.is_empty());

        let (valid, _) = manager.validate_threshold("openai", "m", 0.1);
        assert!(!valid);

        // Valid but advisory for gemini
        let (valid, issues) = manager.validate_threshold("gemini", "m", 0.3);
        assert!(valid);
        assert!(issues.iter().any(|i| i.contains("very low thresholds")));
    }

    #[tokio::test]
    async fn test_track_performance_records_stats() {
        let (manager, logs) = manager();
        let bot = Uuid::new_v4();

        manager
            .track_performance(
                bot,
                0.7,
                "openai",
                "m",
                "what is the api rate limit",
                &[0.9, 0.7],
                0.2,
                true,
                Some(AdjustmentReason::NoResultsFound),
            )
            .await;

        let records = logs.all();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.results_found, 2);
        assert!((r.avg_score.unwrap() - 0.8).abs() < 1e-6);
        assert!((r.max_score.unwrap() - 0.9).abs() < 1e-6);
        assert!(r.score_std_dev.unwrap() > 0.0);
        assert_eq!(r.adjustment_reason.as_deref(), Some("no_results_found"));
        assert_eq!(r.query_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_recommendations_require_samples() {
        let (manager, _) = manager();
        let recs = manager
            .recommendations(Uuid::new_v4(), "openai", "m", 7)
            .await
            .unwrap();
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_recommendations_prefer_better_threshold() {
        let (manager, _) = manager();
        let bot = Uuid::new_v4();

        // 0.7 never finds anything, 0.3 always does
        for _ in 0..6 {
            manager
                .track_performance(bot, 0.7, "openai", "m", "q", &[], 0.1, false, None)
                .await;
            manager
                .track_performance(bot, 0.3, "openai", "m", "q", &[0.5, 0.5, 0.5], 0.1, true, None)
                .await;
        }

        let recs = manager.recommendations(bot, "openai", "m", 7).await.unwrap();
        assert!(!recs.is_empty());
        let main = &recs[0];
        assert!((main.recommended_threshold - 0.3).abs() < 1e-6);
        assert!(main.confidence <= 0.95);
        // Half the queries returned zero results, so the lower-threshold
        // recommendation fires too
        assert!(recs.iter().any(|r| r.reason.contains("no results")));
    }

    #[tokio::test]
    async fn test_performance_summary() {
        let (manager, _) = manager();
        let bot = Uuid::new_v4();

        manager
            .track_performance(bot, 0.7, "openai", "m", "q1", &[0.8], 0.2, true, None)
            .await;
        manager
            .track_performance(bot, 0.7, "openai", "m", "q2", &[], 0.4, false, None)
            .await;

        let summary = manager.performance_summary(bot, 7).await.unwrap();
        assert_eq!(summary.total_queries, 2);
        assert!((summary.success_rate - 0.5).abs() < 1e-9);
        assert!((summary.avg_processing_time - 0.3).abs() < 1e-9);
        assert_eq!(summary.most_used_threshold, Some(0.7));
    }
}
