//! Adaptive mode routing with a learning loop
//!
//! A fixed rule table applied top-to-bottom picks the retrieval mode for
//! most queries; the remainder fall through to an adaptive scorer over
//! learned per-mode weights. Completed requests feed performance back via
//! an exponential moving average.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::analyzer::{QueryCharacteristics, QueryIntent};
use crate::blender::SynthesisStrategy;

/// Modes of retrieval operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// No document retrieval
    PureLlm,
    /// Pure document retrieval
    DocumentOnly,
    /// Balanced mix
    HybridBalanced,
    /// More LLM, fewer documents
    HybridLlmHeavy,
    /// More documents, less LLM
    HybridDocumentHeavy,
    /// System decides from learned weights
    Adaptive,
    /// LLM enhances retrieved documents
    ContextualEnhancement,
    /// Try strategies in sequence
    FallbackCascade,
}

impl RetrievalMode {
    /// Stable string form used in cache entries and response metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PureLlm => "pure_llm",
            Self::DocumentOnly => "document_only",
            Self::HybridBalanced => "hybrid_balanced",
            Self::HybridLlmHeavy => "hybrid_llm_heavy",
            Self::HybridDocumentHeavy => "hybrid_document_heavy",
            Self::Adaptive => "adaptive",
            Self::ContextualEnhancement => "contextual_enhancement",
            Self::FallbackCascade => "fallback_cascade",
        }
    }

    /// (document_weight, llm_weight) for the mode.
    #[must_use]
    pub fn weights(self) -> (f32, f32) {
        match self {
            Self::PureLlm => (0.0, 1.0),
            Self::DocumentOnly => (1.0, 0.0),
            Self::HybridBalanced | Self::Adaptive => (0.5, 0.5),
            Self::HybridLlmHeavy => (0.3, 0.7),
            Self::HybridDocumentHeavy => (0.7, 0.3),
            Self::ContextualEnhancement => (0.6, 0.4),
            Self::FallbackCascade => (0.4, 0.6),
        }
    }

    /// Fixed fallback chain for the mode.
    #[must_use]
    pub fn fallback_chain(self) -> Vec<Self> {
        match self {
            Self::HybridBalanced => vec![Self::HybridLlmHeavy, Self::PureLlm],
            Self::HybridDocumentHeavy => vec![Self::HybridBalanced, Self::DocumentOnly],
            Self::HybridLlmHeavy => vec![Self::PureLlm, Self::HybridBalanced],
            Self::DocumentOnly => vec![Self::HybridDocumentHeavy, Self::HybridBalanced],
            Self::ContextualEnhancement => vec![Self::HybridBalanced, Self::PureLlm],
            _ => vec![Self::PureLlm],
        }
    }

    const ALL: [Self; 8] = [
        Self::PureLlm,
        Self::DocumentOnly,
        Self::HybridBalanced,
        Self::HybridLlmHeavy,
        Self::HybridDocumentHeavy,
        Self::Adaptive,
        Self::ContextualEnhancement,
        Self::FallbackCascade,
    ];
}

/// The routing verdict for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDecision {
    /// Selected mode
    pub mode: RetrievalMode,
    /// Confidence in the selection
    pub confidence: f32,
    /// Weight given to document content
    pub document_weight: f32,
    /// Weight given to LLM content
    pub llm_weight: f32,
    /// Number of chunks to retrieve
    pub retrieval_depth: usize,
    /// How the blender should combine sources
    pub synthesis_strategy: SynthesisStrategy,
    /// Human-readable justification
    pub rationale: String,
    /// Modes to try when the primary path produces nothing
    pub fallback_modes: Vec<RetrievalMode>,
}

#[derive(Debug, Clone)]
struct PerformanceSample {
    mode: RetrievalMode,
    performance: f32,
}

/// Routing strategy with rule-based selection and adaptive weights.
#[derive(Debug)]
pub struct RoutingStrategy {
    learning_rate: f32,
    mode_weights: RwLock<HashMap<RetrievalMode, f32>>,
    history: Mutex<VecDeque<PerformanceSample>>,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl RoutingStrategy {
    /// Create a strategy with the given learning rate.
    #[must_use]
    pub fn new(learning_rate: f32) -> Self {
        let mut weights = HashMap::new();
        weights.insert(RetrievalMode::PureLlm, 1.0);
        weights.insert(RetrievalMode::DocumentOnly, 1.0);
        weights.insert(RetrievalMode::HybridBalanced, 1.5);
        weights.insert(RetrievalMode::HybridLlmHeavy, 1.3);
        weights.insert(RetrievalMode::HybridDocumentHeavy, 1.3);
        weights.insert(RetrievalMode::Adaptive, 1.0);
        weights.insert(RetrievalMode::ContextualEnhancement, 1.2);
        weights.insert(RetrievalMode::FallbackCascade, 0.8);

        Self {
            learning_rate,
            mode_weights: RwLock::new(weights),
            history: Mutex::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Determine the retrieval strategy for analyzed characteristics.
    ///
    /// The rule table is applied top-to-bottom, first match wins; no match
    /// falls through to the adaptive scorer. A mode that needs documents
    /// degrades to pure LLM (confidence x 0.7) when the corpus is empty.
    #[must_use]
    pub fn determine(
        &self,
        characteristics: &QueryCharacteristics,
        available_documents: usize,
        system_load: f32,
    ) -> RetrievalDecision {
        let rule_match = self.apply_rules(characteristics);

        let (mode, confidence) = match rule_match {
            Some((mode, confidence)) => {
                if available_documents == 0 && mode != RetrievalMode::PureLlm {
                    (RetrievalMode::PureLlm, confidence * 0.7)
                } else {
                    (mode, confidence)
                }
            }
            None => self.adaptive_selection(characteristics, available_documents, system_load),
        };

        self.decision(mode, confidence, characteristics, available_documents)
    }

    #[allow(clippy::similar_names)]
    fn apply_rules(&self, c: &QueryCharacteristics) -> Option<(RetrievalMode, f32)> {
        if c.intent == QueryIntent::FactualLookup && c.requires_factual_accuracy {
            return Some((RetrievalMode::HybridDocumentHeavy, 0.9));
        }
        if c.intent == QueryIntent::CreativeGeneration {
            return Some((RetrievalMode::HybridLlmHeavy, 0.85));
        }
        if c.complexity_score > 0.7 && c.domain_specificity > 0.5 {
            return Some((RetrievalMode::HybridBalanced, 0.8));
        }
        if c.intent == QueryIntent::Conversational && c.conversation_depth < 2 {
            return Some((RetrievalMode::PureLlm, 0.9));
        }
        if c.intent == QueryIntent::Summarization {
            return Some((RetrievalMode::ContextualEnhancement, 0.85));
        }
        if c.temporal_relevance > 0.7 {
            return Some((RetrievalMode::HybridLlmHeavy, 0.75));
        }
        if c.specificity_score > 0.8 {
            return Some((RetrievalMode::HybridDocumentHeavy, 0.8));
        }
        None
    }

    fn adaptive_selection(
        &self,
        c: &QueryCharacteristics,
        available_documents: usize,
        system_load: f32,
    ) -> (RetrievalMode, f32) {
        let weights = self.mode_weights.read();
        let mut scores: Vec<(RetrievalMode, f32)> = Vec::with_capacity(RetrievalMode::ALL.len());

        for mode in RetrievalMode::ALL {
            let mut score = weights.get(&mode).copied().unwrap_or(1.0);

            if available_documents == 0 && mode != RetrievalMode::PureLlm {
                score *= 0.1;
            }
            if system_load > 0.8
                && matches!(mode, RetrievalMode::PureLlm | RetrievalMode::DocumentOnly)
            {
                score *= 1.2;
            }
            if c.requires_factual_accuracy
                && matches!(
                    mode,
                    RetrievalMode::DocumentOnly | RetrievalMode::HybridDocumentHeavy
                )
            {
                score *= 1.3;
            }
            if c.requires_creative_synthesis
                && matches!(mode, RetrievalMode::PureLlm | RetrievalMode::HybridLlmHeavy)
            {
                score *= 1.3;
            }

            scores.push((mode, score));
        }

        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        let (best_mode, best_score) = scores
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((RetrievalMode::HybridBalanced, 1.0));

        let confidence = if total > 0.0 {
            (best_score / total * 2.0).min(1.0)
        } else {
            0.5
        };

        debug!("adaptive selection picked {best_mode:?} (confidence {confidence:.2})");
        (best_mode, confidence)
    }

    fn decision(
        &self,
        mode: RetrievalMode,
        confidence: f32,
        c: &QueryCharacteristics,
        available_documents: usize,
    ) -> RetrievalDecision {
        let (document_weight, llm_weight) = mode.weights();

        RetrievalDecision {
            mode,
            confidence,
            document_weight,
            llm_weight,
            retrieval_depth: Self::retrieval_depth(mode, c, available_documents),
            synthesis_strategy: Self::synthesis_strategy(mode, c),
            rationale: Self::rationale(mode, c),
            fallback_modes: mode.fallback_chain(),
        }
    }

    fn retrieval_depth(
        mode: RetrievalMode,
        c: &QueryCharacteristics,
        available_documents: usize,
    ) -> usize {
        if mode == RetrievalMode::PureLlm {
            return 0;
        }
        if mode == RetrievalMode::DocumentOnly {
            return available_documents.min(10);
        }

        let mut depth: i64 = 5;
        if c.complexity_score > 0.7 {
            depth += 3;
        }
        if c.specificity_score > 0.7 {
            depth -= 2;
        }
        match mode {
            RetrievalMode::HybridDocumentHeavy => depth += 2,
            RetrievalMode::HybridLlmHeavy => depth -= 2,
            _ => {}
        }

        usize::try_from(depth.max(1)).unwrap_or(1).min(available_documents.max(1))
    }

    fn synthesis_strategy(mode: RetrievalMode, c: &QueryCharacteristics) -> SynthesisStrategy {
        match mode {
            RetrievalMode::PureLlm => SynthesisStrategy::LlmGeneration,
            RetrievalMode::DocumentOnly => SynthesisStrategy::DocumentExtraction,
            RetrievalMode::ContextualEnhancement => SynthesisStrategy::LlmEnhancedDocuments,
            _ => {
                if c.intent == QueryIntent::Summarization {
                    SynthesisStrategy::ExtractiveSummarization
                } else if c.intent == QueryIntent::Comparison {
                    SynthesisStrategy::ComparativeSynthesis
                } else if c.requires_creative_synthesis {
                    SynthesisStrategy::CreativeBlending
                } else {
                    SynthesisStrategy::WeightedCombination
                }
            }
        }
    }

    fn rationale(mode: RetrievalMode, c: &QueryCharacteristics) -> String {
        let mut parts = vec![format!("Selected {} mode", mode.as_str())];

        if c.complexity_score > 0.7 {
            parts.push("due to high query complexity".to_string());
        }
        if c.requires_factual_accuracy {
            parts.push("requiring factual accuracy from documents".to_string());
        }
        if c.requires_creative_synthesis {
            parts.push("requiring creative synthesis from LLM".to_string());
        }
        if c.domain_specificity > 0.5 {
            parts.push(format!(
                "with domain-specific content (score: {:.2})",
                c.domain_specificity
            ));
        }

        parts.join("; ")
    }

    /// Feed performance back for the mode that served a request:
    /// `w <- (1 - lr) * w + lr * 2 * performance`.
    pub fn update_weight(&self, mode: RetrievalMode, performance: f32) {
        let mut weights = self.mode_weights.write();
        let current = weights.get(&mode).copied().unwrap_or(1.0);
        let updated = (1.0 - self.learning_rate) * current + self.learning_rate * performance * 2.0;
        weights.insert(mode, updated);

        let mut history = self.history.lock();
        if history.len() >= 1000 {
            history.pop_front();
        }
        history.push_back(PerformanceSample { mode, performance });
    }

    /// Current weight of a mode.
    #[must_use]
    pub fn weight(&self, mode: RetrievalMode) -> f32 {
        self.mode_weights.read().get(&mode).copied().unwrap_or(1.0)
    }

    /// Mean recorded performance per mode.
    #[must_use]
    pub fn mode_effectiveness(&self) -> HashMap<RetrievalMode, f32> {
        let history = self.history.lock();
        let mut sums: HashMap<RetrievalMode, (f32, usize)> = HashMap::new();
        for sample in history.iter() {
            let entry = sums.entry(sample.mode).or_insert((0.0, 0));
            entry.0 += sample.performance;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(mode, (sum, count))| (mode, sum / count as f32))
            .collect()
    }
}
