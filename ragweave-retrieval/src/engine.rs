//! Adaptive retrieval engine: a threshold cascade around vector search
//!
//! Tries thresholds in decreasing order until results appear, logging
//! every attempt. An empty corpus or over-strict threshold is a
//! successful empty result, not an error; an error surfaces only when
//! every attempt raised.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_storage::repository::{BotStore, DocumentStore};
use ragweave_storage::vector::{SearchHit, VectorStore};

use crate::thresholds::{AdjustmentReason, ThresholdManager, ThresholdRecommendation};

/// Context a retrieval runs in; feeds the optimal-threshold math.
#[derive(Debug, Clone)]
pub struct RetrievalContext {
    /// Bot the retrieval targets
    pub bot_id: Uuid,
    /// Original query text (used for logging, not matching)
    pub query_text: String,
    /// Optional content-type tag (technical, code, legal, ...)
    pub content_type: Option<String>,
    /// Documents in the corpus
    pub document_count: usize,
    /// Mean document length in characters, when known
    pub avg_document_length: Option<f64>,
}

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievedChunk {
    /// Vector point id
    pub id: String,
    /// Similarity score
    pub score: f32,
    /// Chunk text
    pub content: String,
    /// Parent document
    pub document_id: Uuid,
    /// Position within the document
    pub chunk_index: u32,
}

impl From<SearchHit> for RetrievedChunk {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            score: hit.score,
            content: hit.payload.content,
            document_id: hit.payload.document_id,
            chunk_index: hit.payload.chunk_index,
        }
    }
}

/// Outcome of an adaptive retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Whether the operation completed (an empty result is still a
    /// success)
    pub success: bool,
    /// Retrieved chunks, best first
    pub chunks: Vec<RetrievedChunk>,
    /// Threshold that produced the chunks (0.0 for no threshold)
    pub threshold_used: f32,
    /// Number of thresholds attempted
    pub total_attempts: usize,
    /// Wall time in seconds
    pub processing_time: f64,
    /// Whether a fallback threshold (not the first) produced the result
    pub fallback_used: bool,
    /// Every threshold value attempted, in order (no-threshold omitted)
    pub thresholds_tried: Vec<f32>,
}

/// Suggestion from the retrieval optimizer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OptimizationSuggestion {
    /// Category of the suggestion
    pub suggestion_type: String,
    /// Current value, rendered
    pub current_value: String,
    /// Suggested value, rendered
    pub suggested_value: String,
    /// Expected effect
    pub expected_improvement: String,
    /// Confidence in the suggestion
    pub confidence: f32,
}

/// Retrieval engine with provider-aware threshold cascades.
pub struct AdaptiveRetrievalEngine {
    bots: Arc<dyn BotStore>,
    documents: Arc<dyn DocumentStore>,
    vector: Arc<dyn VectorStore>,
    thresholds: Arc<ThresholdManager>,
    enable_performance_tracking: bool,
    enable_adaptive_adjustment: bool,
}

impl std::fmt::Debug for AdaptiveRetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRetrievalEngine")
            .field("tracking", &self.enable_performance_tracking)
            .field("adaptive", &self.enable_adaptive_adjustment)
            .finish_non_exhaustive()
    }
}

impl AdaptiveRetrievalEngine {
    /// Create an engine over the given stores.
    #[must_use]
    pub fn new(
        bots: Arc<dyn BotStore>,
        documents: Arc<dyn DocumentStore>,
        vector: Arc<dyn VectorStore>,
        thresholds: Arc<ThresholdManager>,
    ) -> Self {
        Self {
            bots,
            documents,
            vector,
            thresholds,
            enable_performance_tracking: true,
            enable_adaptive_adjustment: true,
        }
    }

    /// The threshold manager this engine logs through.
    #[must_use]
    pub fn thresholds(&self) -> Arc<ThresholdManager> {
        Arc::clone(&self.thresholds)
    }

    /// Retrieve the most relevant chunks for a query embedding.
    ///
    /// Builds the threshold cascade (custom prefix plus adaptive
    /// fallbacks, or the provider defaults), tries each in order and
    /// returns on the first non-empty result. Zero results on every
    /// threshold is a successful empty outcome carrying the attempted
    /// threshold list.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist; `Validation` when
    /// `max_chunks` is zero; `Retrieval` when every attempted search
    /// raised (the last error is surfaced).
    pub async fn retrieve_relevant_chunks(
        &self,
        bot_id: Uuid,
        query_embedding: &[f32],
        context: &RetrievalContext,
        custom_threshold: Option<f32>,
        max_chunks: usize,
    ) -> Result<RetrievalOutcome> {
        let start = Instant::now();

        if max_chunks == 0 {
            return Err(RagweaveError::Validation {
                message: "max_chunks must be at least 1".to_string(),
            });
        }

        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        let provider = bot.embedding_provider.clone();
        let model = bot.embedding_model.clone();

        let cascade = self.build_cascade(&provider, &model, context, custom_threshold);
        let thresholds_tried: Vec<f32> = cascade.iter().flatten().copied().collect();
        let collection = bot.collection_name();

        let mut total_attempts = 0;
        let mut last_error: Option<String> = None;
        let mut any_search_succeeded = false;

        for (attempt, threshold) in cascade.iter().enumerate() {
            total_attempts += 1;
            debug!("attempt {}: threshold {threshold:?}", attempt + 1);

            let hits = match self
                .vector
                .search(&collection, query_embedding, max_chunks, *threshold)
                .await
            {
                Ok(hits) => {
                    any_search_succeeded = true;
                    hits
                }
                Err(err) => {
                    warn!(
                        "search attempt {} failed with threshold {threshold:?}: {err}",
                        attempt + 1
                    );
                    last_error = Some(err.to_string());
                    continue;
                }
            };

            let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();

            if self.enable_performance_tracking {
                let reason = (attempt > 0).then_some(AdjustmentReason::NoResultsFound);
                self.thresholds
                    .track_performance(
                        bot_id,
                        threshold.unwrap_or(0.0),
                        &provider,
                        &model,
                        &context.query_text,
                        &scores,
                        start.elapsed().as_secs_f64(),
                        !hits.is_empty(),
                        reason,
                    )
                    .await;
            }

            if !hits.is_empty() {
                info!(
                    "found {} chunks for bot {bot_id} with threshold {threshold:?} on attempt {}",
                    hits.len(),
                    attempt + 1
                );
                return Ok(RetrievalOutcome {
                    success: true,
                    chunks: hits.into_iter().map(RetrievedChunk::from).collect(),
                    threshold_used: threshold.unwrap_or(0.0),
                    total_attempts,
                    processing_time: start.elapsed().as_secs_f64(),
                    fallback_used: attempt > 0,
                    thresholds_tried,
                });
            }
        }

        if !any_search_succeeded {
            if let Some(message) = last_error {
                return Err(RagweaveError::Retrieval { message });
            }
        }

        info!("no relevant chunks for bot {bot_id} after {total_attempts} attempts");
        Ok(RetrievalOutcome {
            success: true,
            chunks: Vec::new(),
            threshold_used: thresholds_tried.first().copied().unwrap_or(0.0),
            total_attempts,
            processing_time: start.elapsed().as_secs_f64(),
            fallback_used: false,
            thresholds_tried,
        })
    }

    fn build_cascade(
        &self,
        provider: &str,
        model: &str,
        context: &RetrievalContext,
        custom_threshold: Option<f32>,
    ) -> Vec<Option<f32>> {
        match custom_threshold {
            Some(custom) => {
                let (valid, issues) = self.thresholds.validate_threshold(provider, model, custom);
                if !valid || !issues.is_empty() {
                    warn!("custom threshold validation issues: {issues:?}");
                }
                if self.enable_adaptive_adjustment {
                    // Keep the caller's value first; the manager's cascade
                    // provides the fallbacks below it
                    let mut cascade = self.thresholds.retry_thresholds(provider, model, Some(custom));
                    if cascade.is_empty() {
                        cascade.push(Some(custom));
                    }
                    cascade
                } else {
                    vec![Some(custom)]
                }
            }
            None => {
                let optimal = self.thresholds.calculate_optimal(provider, model, context);
                if !self.enable_adaptive_adjustment {
                    return vec![Some(optimal)];
                }
                let default = self
                    .thresholds
                    .config_for(provider, Some(model))
                    .map(|c| c.default_threshold)
                    .unwrap_or(optimal);
                if (optimal - default).abs() > f32::EPSILON {
                    // Context shifted the starting point; step down from it
                    self.thresholds.retry_thresholds(provider, model, Some(optimal))
                } else {
                    self.thresholds.retry_thresholds(provider, model, None)
                }
            }
        }
    }

    /// Optimization suggestions for a bot: threshold recommendations from
    /// the performance log, corpus-size hints and provider-specific
    /// advice.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist; `Storage` on log access
    /// failures.
    pub async fn optimize_retrieval(
        &self,
        bot_id: Uuid,
        lookback_days: i64,
    ) -> Result<Vec<OptimizationSuggestion>> {
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        let mut suggestions = Vec::new();

        let recommendations: Vec<ThresholdRecommendation> = self
            .thresholds
            .recommendations(bot_id, &bot.embedding_provider, &bot.embedding_model, lookback_days)
            .await?;

        for rec in recommendations {
            suggestions.push(OptimizationSuggestion {
                suggestion_type: "similarity_threshold".to_string(),
                current_value: format!("{:.3}", rec.current_threshold),
                suggested_value: format!("{:.3}", rec.recommended_threshold),
                expected_improvement: rec.reason,
                confidence: rec.confidence,
            });
        }

        let doc_count = self
            .documents
            .count_for_bot(bot_id)
            .await
            .map_err(RagweaveError::storage)?;

        if doc_count == 0 {
            suggestions.push(OptimizationSuggestion {
                suggestion_type: "document_collection".to_string(),
                current_value: "0".to_string(),
                suggested_value: "Add documents".to_string(),
                expected_improvement: "Enable RAG functionality by uploading relevant documents"
                    .to_string(),
                confidence: 1.0,
            });
        } else if doc_count < 5 {
            suggestions.push(OptimizationSuggestion {
                suggestion_type: "document_collection".to_string(),
                current_value: doc_count.to_string(),
                suggested_value: "Add more documents".to_string(),
                expected_improvement: "Improve answer quality with more diverse content"
                    .to_string(),
                confidence: 0.8,
            });
        }

        if let Ok(config) = self
            .thresholds
            .config_for(&bot.embedding_provider, Some(&bot.embedding_model))
        {
            if bot.embedding_provider == "gemini" && config.default_threshold > 0.05 {
                suggestions.push(OptimizationSuggestion {
                    suggestion_type: "provider_optimization".to_string(),
                    current_value: format!("{:.3}", config.default_threshold),
                    suggested_value: "0.01".to_string(),
                    expected_improvement: "Gemini embeddings work better with very low thresholds"
                        .to_string(),
                    confidence: 0.9,
                });
            }
        }

        Ok(suggestions)
    }
}
