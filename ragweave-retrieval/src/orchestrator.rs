//! Hybrid orchestrator: analyze, route, fan out, blend, learn, cache
//!
//! For each query: analyze characteristics, route to a retrieval mode,
//! consult the cache, then issue the LLM call and the vector retrieval
//! concurrently (as the mode demands), blend whatever arrived, record the
//! performance sample and cache the result. Provider failures never
//! surface raw: the caller always gets a response, degraded if necessary.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ragweave_core::error::{RagweaveError, Result};
use ragweave_core::model::Bot;
use ragweave_providers::abstraction::GenerationConfig;
use ragweave_providers::credentials::CredentialResolver;
use ragweave_providers::registry::ProviderRegistry;
use ragweave_storage::repository::{BotStore, DocumentStore};

use crate::analyzer::{ConversationTurn, QueryAnalyzer, QueryCharacteristics, UserProfile};
use crate::blender::{HybridResponse, InformationDensity, ResponseBlender};
use crate::cache::{context_from_characteristics, ContextAwareCache};
use crate::engine::{AdaptiveRetrievalEngine, OptimizationSuggestion, RetrievalContext, RetrievedChunk};
use crate::router::{RetrievalDecision, RetrievalMode, RoutingStrategy};
use crate::thresholds::ThresholdRecommendation;

/// One query to answer.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Bot to answer from
    pub bot_id: Uuid,
    /// Requesting user
    pub user_id: Uuid,
    /// Query text
    pub query: String,
    /// Prior conversation turns
    pub history: Vec<ConversationTurn>,
    /// Optional per-user hints
    pub user_profile: Option<UserProfile>,
}

/// Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Feed performance back into the router weights
    pub enable_adaptive_learning: bool,
    /// Degrade instead of erroring when a request fails
    pub enable_fallback: bool,
    /// Total deadline per request
    pub request_timeout: Duration,
    /// Consult and populate the response cache
    pub enable_caching: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_adaptive_learning: true,
            enable_fallback: true,
            request_timeout: Duration::from_secs(10),
            enable_caching: true,
        }
    }
}

/// Corpus shape of the bot being queried, computed once per request and
/// threaded into both the router and the retrieval engine.
#[derive(Debug, Clone, Copy)]
struct CorpusProfile {
    document_count: usize,
    avg_document_length: Option<f64>,
}

/// The hybrid retrieval orchestrator.
pub struct HybridOrchestrator {
    analyzer: QueryAnalyzer,
    router: Arc<RoutingStrategy>,
    blender: ResponseBlender,
    cache: Arc<ContextAwareCache>,
    engine: Arc<AdaptiveRetrievalEngine>,
    credentials: Arc<CredentialResolver>,
    registry: Arc<ProviderRegistry>,
    bots: Arc<dyn BotStore>,
    documents: Arc<dyn DocumentStore>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for HybridOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HybridOrchestrator {
    /// Wire up the orchestrator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        router: Arc<RoutingStrategy>,
        cache: Arc<ContextAwareCache>,
        engine: Arc<AdaptiveRetrievalEngine>,
        credentials: Arc<CredentialResolver>,
        registry: Arc<ProviderRegistry>,
        bots: Arc<dyn BotStore>,
        documents: Arc<dyn DocumentStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(),
            router,
            blender: ResponseBlender::new(),
            cache,
            engine,
            credentials,
            registry,
            bots,
            documents,
            config,
        }
    }

    /// Answer a query with a fresh cancellation scope.
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist. Every other failure is
    /// absorbed into a degraded pure-LLM response when fallback is
    /// enabled, or surfaced otherwise.
    pub async fn answer_query(&self, request: QueryRequest) -> Result<HybridResponse> {
        self.answer_query_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Answer a query under an externally owned cancellation token.
    ///
    /// The per-request deadline and the token both cancel the concurrent
    /// LLM and retrieval sub-calls; the blender runs over whatever
    /// results arrived before that point.
    ///
    /// # Errors
    ///
    /// See [`Self::answer_query`].
    pub async fn answer_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<HybridResponse> {
        let start = Instant::now();

        let bot = self
            .bots
            .get(request.bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", request.bot_id))?;

        let work = self.process(&request, &bot, &cancel, start);
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(RagweaveError::Timeout {
                operation: "answer_query".to_string(),
                seconds: start.elapsed().as_secs_f64(),
            }),
            result = tokio::time::timeout(self.config.request_timeout, work) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => {
                        cancel.cancel();
                        Err(RagweaveError::Timeout {
                            operation: "answer_query".to_string(),
                            seconds: self.config.request_timeout.as_secs_f64(),
                        })
                    }
                }
            }
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                error!("hybrid retrieval failed: {err}");
                if self.config.enable_fallback {
                    Ok(Self::fallback_response(&request.query, &err.to_string(), start))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn process(
        &self,
        request: &QueryRequest,
        bot: &Bot,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<HybridResponse> {
        // Step 1: analyze
        let characteristics = self.analyzer.analyze(
            &request.query,
            &request.history,
            request.user_profile.as_ref(),
        );
        info!(
            "query analysis: intent={}, complexity={:.2}",
            characteristics.intent.as_str(),
            characteristics.complexity_score
        );

        // Step 2: corpus profile (document availability and average size)
        let corpus_documents = self
            .documents
            .list_for_bot(request.bot_id)
            .await
            .map_err(RagweaveError::storage)?;
        let corpus = CorpusProfile {
            document_count: corpus_documents.len(),
            avg_document_length: if corpus_documents.is_empty() {
                None
            } else {
                Some(
                    corpus_documents.iter().map(|d| d.file_size as f64).sum::<f64>()
                        / corpus_documents.len() as f64,
                )
            },
        };

        // Step 3: route
        let decision = self
            .router
            .determine(&characteristics, corpus.document_count, 0.5);
        info!(
            "retrieval decision: mode={}, confidence={:.2}",
            decision.mode.as_str(),
            decision.confidence
        );

        // Step 4: cache lookup
        let context = context_from_characteristics(&characteristics);
        if self.config.enable_caching {
            if let Some(entry) = self
                .cache
                .get(
                    &request.query,
                    request.bot_id,
                    request.user_id,
                    &context,
                    characteristics.conversation_depth,
                )
                .await
            {
                debug!("serving cached response");
                return Ok(Self::response_from_cache(entry, start));
            }
        }

        // Step 5: execute the mode
        let (llm_response, chunks) = self
            .execute_mode(request, bot, &decision, &characteristics, corpus, cancel)
            .await;

        // Step 6: blend
        let mut response =
            self.blender
                .blend(llm_response.as_deref(), &chunks, &decision, &request.query);
        response.processing_time = start.elapsed().as_secs_f64();

        // Step 7: learning loop
        if self.config.enable_adaptive_learning {
            let score = Self::performance_estimate(&response);
            self.router.update_weight(decision.mode, score);
        }

        // Step 8: cache write
        if self.config.enable_caching {
            self.cache
                .set(
                    &request.query,
                    request.bot_id,
                    request.user_id,
                    &response,
                    &context,
                    &characteristics,
                )
                .await;
        }

        Ok(response)
    }

    async fn execute_mode(
        &self,
        request: &QueryRequest,
        bot: &Bot,
        decision: &RetrievalDecision,
        characteristics: &QueryCharacteristics,
        corpus: CorpusProfile,
        cancel: &CancellationToken,
    ) -> (Option<String>, Vec<RetrievedChunk>) {
        match decision.mode {
            RetrievalMode::PureLlm => (self.llm_response(request, bot, cancel).await, Vec::new()),
            RetrievalMode::DocumentOnly => (
                None,
                self.retrieve_chunks(
                    request,
                    bot,
                    decision.retrieval_depth,
                    characteristics,
                    corpus,
                    cancel,
                )
                .await,
            ),
            RetrievalMode::FallbackCascade => {
                self.fallback_cascade(request, bot, decision, characteristics, corpus, cancel)
                    .await
            }
            _ => {
                // Hybrid modes fan out concurrently; either side failing
                // degrades to its empty value
                let (llm, chunks) = tokio::join!(
                    self.llm_response(request, bot, cancel),
                    self.retrieve_chunks(
                        request,
                        bot,
                        decision.retrieval_depth,
                        characteristics,
                        corpus,
                        cancel
                    ),
                );
                (llm, chunks)
            }
        }
    }

    async fn fallback_cascade(
        &self,
        request: &QueryRequest,
        bot: &Bot,
        decision: &RetrievalDecision,
        characteristics: &QueryCharacteristics,
        corpus: CorpusProfile,
        cancel: &CancellationToken,
    ) -> (Option<String>, Vec<RetrievedChunk>) {
        let mut modes = vec![decision.mode];
        modes.extend(decision.fallback_modes.iter().copied());

        for mode in modes {
            if cancel.is_cancelled() {
                break;
            }
            if matches!(mode, RetrievalMode::PureLlm | RetrievalMode::HybridLlmHeavy) {
                if let Some(llm) = self.llm_response(request, bot, cancel).await {
                    return (Some(llm), Vec::new());
                }
            } else {
                let chunks = self
                    .retrieve_chunks(
                        request,
                        bot,
                        decision.retrieval_depth,
                        characteristics,
                        corpus,
                        cancel,
                    )
                    .await;
                if !chunks.is_empty() {
                    return (None, chunks);
                }
            }
            warn!("cascade mode {} produced nothing, trying next", mode.as_str());
        }

        (None, Vec::new())
    }

    /// Generate the LLM side; failures are absorbed to `None`.
    async fn llm_response(
        &self,
        request: &QueryRequest,
        bot: &Bot,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let work = async {
            let resolved = self
                .credentials
                .resolve_with_fallback(request.bot_id, request.user_id, &bot.llm_provider, true)
                .await
                .map_err(|err| {
                    warn!("LLM credential resolution failed: {err}");
                })
                .ok()?;

            let provider = self.registry.llm(&resolved.provider).or_else(|| {
                warn!("no LLM provider registered for {}", resolved.provider);
                None
            })?;

            let prompt = Self::build_prompt(&request.query, &request.history);
            match provider
                .generate(&bot.llm_model, &prompt, &resolved.api_key, &GenerationConfig::default())
                .await
            {
                Ok(text) => Some(text),
                Err(err) => {
                    warn!("LLM generation failed: {err}");
                    None
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => None,
            result = work => result,
        }
    }

    /// Run the retrieval side; failures are absorbed to empty.
    async fn retrieve_chunks(
        &self,
        request: &QueryRequest,
        bot: &Bot,
        depth: usize,
        characteristics: &QueryCharacteristics,
        corpus: CorpusProfile,
        cancel: &CancellationToken,
    ) -> Vec<RetrievedChunk> {
        if depth == 0 {
            return Vec::new();
        }

        let work = async {
            let resolved = self
                .credentials
                .resolve_with_fallback(request.bot_id, request.user_id, &bot.embedding_provider, true)
                .await
                .map_err(|err| warn!("embedding credential resolution failed: {err}"))
                .ok()?;

            let provider = self.registry.embedding(&resolved.provider)?;
            let embeddings = provider
                .generate_embeddings(
                    &bot.embedding_model,
                    &[request.query.clone()],
                    &resolved.api_key,
                )
                .await
                .map_err(|err| warn!("query embedding failed: {err}"))
                .ok()?;
            let query_embedding = embeddings.into_iter().next()?;

            let context = RetrievalContext {
                bot_id: request.bot_id,
                query_text: request.query.clone(),
                content_type: characteristics
                    .has_technical_terms
                    .then(|| "technical".to_string()),
                document_count: corpus.document_count,
                avg_document_length: corpus.avg_document_length,
            };

            match self
                .engine
                .retrieve_relevant_chunks(request.bot_id, &query_embedding, &context, None, depth)
                .await
            {
                Ok(outcome) => Some(outcome.chunks),
                Err(err) => {
                    warn!("document retrieval failed: {err}");
                    None
                }
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Vec::new(),
            result = work => result.unwrap_or_default(),
        }
    }

    fn build_prompt(query: &str, history: &[ConversationTurn]) -> String {
        if history.is_empty() {
            return query.to_string();
        }

        let mut prompt = String::new();
        for turn in history.iter().rev().take(3).rev() {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        prompt.push_str(&format!("user: {query}"));
        prompt
    }

    /// Internal performance estimate feeding the learning loop.
    fn performance_estimate(response: &HybridResponse) -> f32 {
        let mut score: f32 = 0.7;
        if response.confidence_score > 0.8 {
            score += 0.1;
        }
        if response.processing_time < 2.0 {
            score += 0.1;
        }
        if response.information_density >= InformationDensity::High {
            score += 0.1;
        }
        score.min(1.0)
    }

    fn response_from_cache(entry: crate::cache::CachedEntry, start: Instant) -> HybridResponse {
        let (document_contribution, llm_contribution) = entry.mode_used.weights();
        let mut metadata = entry.metadata.clone();
        metadata.insert("cache_hit".to_string(), serde_json::json!(true));

        HybridResponse {
            information_density: ResponseBlender::assess_density(&entry.content),
            content: entry.content,
            mode_used: entry.mode_used,
            sources_used: entry.sources,
            confidence_score: entry.confidence_score,
            processing_time: start.elapsed().as_secs_f64(),
            document_contribution,
            llm_contribution,
            metadata,
        }
    }

    fn fallback_response(query: &str, error: &str, start: Instant) -> HybridResponse {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("fallback".to_string(), serde_json::json!(true));
        metadata.insert("error".to_string(), serde_json::json!(error));

        HybridResponse {
            content: format!("I'll do my best to help with your query: {query}"),
            mode_used: RetrievalMode::PureLlm,
            sources_used: vec!["LLM".to_string()],
            confidence_score: 0.5,
            information_density: InformationDensity::Low,
            processing_time: start.elapsed().as_secs_f64(),
            document_contribution: 0.0,
            llm_contribution: 1.0,
            metadata,
        }
    }

    /// Threshold recommendations for a bot (public surface for admins).
    ///
    /// # Errors
    ///
    /// `NotFound` when the bot does not exist; `Storage` on log access
    /// failures.
    pub async fn recommend_thresholds(
        &self,
        bot_id: Uuid,
        days: i64,
    ) -> Result<Vec<ThresholdRecommendation>> {
        let bot = self
            .bots
            .get(bot_id)
            .await
            .map_err(RagweaveError::storage)?
            .ok_or_else(|| RagweaveError::not_found("bot", bot_id))?;

        self.engine
            .thresholds()
            .recommendations(bot_id, &bot.embedding_provider, &bot.embedding_model, days)
            .await
    }

    /// Retrieval optimization suggestions for a bot.
    ///
    /// # Errors
    ///
    /// See [`AdaptiveRetrievalEngine::optimize_retrieval`].
    pub async fn optimize_retrieval(
        &self,
        bot_id: Uuid,
        lookback_days: i64,
    ) -> Result<Vec<OptimizationSuggestion>> {
        self.engine.optimize_retrieval(bot_id, lookback_days).await
    }

    /// Mean recorded performance per retrieval mode.
    #[must_use]
    pub fn mode_effectiveness(&self) -> std::collections::HashMap<RetrievalMode, f32> {
        self.router.mode_effectiveness()
    }
}
