//! Query characteristic analysis for routing decisions
//!
//! A pattern-bag classifier over lowercase query text. No model calls:
//! routing has to be cheap enough to run on every request.

use serde::{Deserialize, Serialize};

/// Detected query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Direct fact retrieval ("what is", "when did", ...)
    FactualLookup,
    /// Why/how reasoning over causes and implications
    AnalyticalReasoning,
    /// Open-ended creation ("write", "compose", "imagine")
    CreativeGeneration,
    /// Greetings, acknowledgements, chit-chat
    Conversational,
    /// Asking for clarification of a previous answer
    Clarification,
    /// Condensing content ("summarize", "tldr")
    Summarization,
    /// Comparing alternatives ("versus", "pros and cons")
    Comparison,
    /// Asking for advice ("recommend", "should I")
    Recommendation,
    /// Procedural/technical how-to
    TechnicalExplanation,
    /// Continuation of an earlier thread ("what about", "also")
    FollowUp,
}

impl QueryIntent {
    /// Stable string form used in cache context maps.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FactualLookup => "factual_lookup",
            Self::AnalyticalReasoning => "analytical_reasoning",
            Self::CreativeGeneration => "creative_generation",
            Self::Conversational => "conversational",
            Self::Clarification => "clarification",
            Self::Summarization => "summarization",
            Self::Comparison => "comparison",
            Self::Recommendation => "recommendation",
            Self::TechnicalExplanation => "technical_explanation",
            Self::FollowUp => "follow_up",
        }
    }
}

const INTENT_PATTERNS: &[(QueryIntent, &[&str])] = &[
    (
        QueryIntent::FactualLookup,
        &[
            "what is", "when did", "where is", "who is", "define", "tell me about",
            "explain what", "list", "name",
        ],
    ),
    (
        QueryIntent::AnalyticalReasoning,
        &[
            "why", "how does", "analyze", "evaluate", "assess", "what causes",
            "implications of", "impact of", "reason for",
        ],
    ),
    (
        QueryIntent::CreativeGeneration,
        &[
            "create", "generate", "write", "compose", "design", "imagine",
            "suggest creative", "come up with", "invent",
        ],
    ),
    (
        QueryIntent::Conversational,
        &[
            "hello", "hi", "thanks", "okay", "yes", "no", "can you", "please",
            "could you", "would you",
        ],
    ),
    (
        QueryIntent::Clarification,
        &[
            "what do you mean", "can you clarify", "explain further",
            "i don't understand", "be more specific", "elaborate",
        ],
    ),
    (
        QueryIntent::Summarization,
        &[
            "summarize", "summary", "key points", "main ideas", "overview", "brief",
            "tldr", "in short", "bottom line",
        ],
    ),
    (
        QueryIntent::Comparison,
        &[
            "compare", "difference between", "versus", "vs", "similarities",
            "contrast", "better than", "pros and cons",
        ],
    ),
    (
        QueryIntent::Recommendation,
        &[
            "recommend", "suggest", "best", "should i", "advice", "which one",
            "optimal", "preferred", "top choice",
        ],
    ),
    (
        QueryIntent::TechnicalExplanation,
        &[
            "how to", "steps to", "procedure", "method", "technique",
            "implementation", "configure", "setup", "install",
        ],
    ),
    (
        QueryIntent::FollowUp,
        &[
            "also", "additionally", "furthermore", "what about", "how about", "and",
            "related to", "follow up", "more about",
        ],
    ),
];

const TECHNICAL_TERMS: &[&str] = &[
    "api", "algorithm", "database", "framework", "protocol", "implementation",
    "architecture", "system", "configuration",
];

const TEMPORAL_KEYWORDS: &[&str] = &[
    "current", "latest", "recent", "today", "now", "updated", "2024", "2023",
    "this year", "this month", "real-time",
];

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("technical", &["algorithm", "system", "process", "architecture", "implementation"]),
    ("business", &["revenue", "strategy", "market", "customer", "competitive"]),
    ("scientific", &["hypothesis", "experiment", "data", "analysis", "research"]),
    ("legal", &["contract", "regulation", "compliance", "liability", "jurisdiction"]),
    ("medical", &["diagnosis", "treatment", "symptoms", "patient", "clinical"]),
];

const FACTUAL_KEYWORDS: &[&str] = &[
    "accurate", "exact", "precise", "correct", "fact", "true", "false", "verify",
    "confirm", "data",
];

const CAUSAL_MARKERS: &[&str] = &["because", "due to", "leads to", "results in", "caused by"];

/// A single conversation turn, as fed into the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// "user" or "assistant"
    pub role: String,
    /// Message content
    pub content: String,
}

/// Optional per-user hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Known expertise level in [0, 1]
    pub expertise_level: Option<f32>,
}

/// Comprehensive query characteristics for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCharacteristics {
    /// Structural complexity in [0, 1]
    pub complexity_score: f32,
    /// How specific the query is in [0, 1]
    pub specificity_score: f32,
    /// How time-sensitive the query is in [0, 1]
    pub temporal_relevance: f32,
    /// Domain-vocabulary density in [0, 1]
    pub domain_specificity: f32,
    /// Primary detected intent
    pub intent: QueryIntent,
    /// Whether the answer must be factually grounded
    pub requires_factual_accuracy: bool,
    /// Whether the answer calls for creative synthesis
    pub requires_creative_synthesis: bool,
    /// Number of prior turns in the conversation
    pub conversation_depth: usize,
    /// Estimated user expertise in [0, 1]
    pub user_expertise_level: f32,
    /// Character length of the query
    pub query_length: usize,
    /// Word count of the query
    pub word_count: usize,
    /// Whether technical vocabulary is present
    pub has_technical_terms: bool,
}

/// Pattern-bag query analyzer.
#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Create an analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Analyze a query against its conversation context.
    #[must_use]
    pub fn analyze(
        &self,
        query: &str,
        history: &[ConversationTurn],
        profile: Option<&UserProfile>,
    ) -> QueryCharacteristics {
        let lower = query.to_lowercase();
        let lower = lower.trim();

        let intent = Self::detect_intent(lower);
        let complexity_score = Self::complexity(lower);
        let specificity_score = Self::specificity(query);
        let temporal_relevance = Self::temporal_relevance(lower);
        let domain_specificity = Self::domain_specificity(lower);
        let requires_factual_accuracy = Self::requires_factual(lower, intent);
        let requires_creative_synthesis = matches!(
            intent,
            QueryIntent::CreativeGeneration
                | QueryIntent::Recommendation
                | QueryIntent::AnalyticalReasoning
        );
        let user_expertise_level = Self::estimate_expertise(lower, query, profile);

        QueryCharacteristics {
            complexity_score,
            specificity_score,
            temporal_relevance,
            domain_specificity,
            intent,
            requires_factual_accuracy,
            requires_creative_synthesis,
            conversation_depth: history.len(),
            user_expertise_level,
            query_length: query.len(),
            word_count: query.split_whitespace().count(),
            has_technical_terms: Self::has_technical_terms(lower),
        }
    }

    /// Pick the intent with the most pattern matches; ties go to the
    /// earlier entry, no matches default to factual lookup.
    fn detect_intent(query: &str) -> QueryIntent {
        let mut best = QueryIntent::FactualLookup;
        let mut best_count = 0;

        for (intent, patterns) in INTENT_PATTERNS {
            let count = patterns.iter().filter(|p| query.contains(*p)).count();
            if count > best_count {
                best_count = count;
                best = *intent;
            }
        }
        best
    }

    fn complexity(query: &str) -> f32 {
        let mut score: f32 = 0.0;

        if ["and", "also", "additionally", "?"].iter().any(|m| query.contains(m)) {
            score += 0.30;
        }
        if ["which", "that", "where", "when", "who"].iter().any(|m| query.contains(m)) {
            score += 0.20;
        }
        if Self::has_technical_terms(query) {
            score += 0.20;
        }
        if ["if", "when", "unless", "provided", "assuming"].iter().any(|m| query.contains(m)) {
            score += 0.15;
        }
        if ["before", "after", "during", "since", "until"].iter().any(|m| query.contains(m)) {
            score += 0.10;
        }
        if CAUSAL_MARKERS.iter().any(|m| query.contains(m)) {
            score += 0.15;
        }

        score.min(1.0)
    }

    fn specificity(query: &str) -> f32 {
        let mut indicators = 0;

        if query.chars().any(|c| c.is_ascii_digit()) {
            indicators += 1;
        }
        if query.contains('"') || query.contains('\'') {
            indicators += 1;
        }

        let words: Vec<&str> = query.split_whitespace().collect();
        if words
            .iter()
            .skip(1)
            .any(|w| w.chars().next().is_some_and(char::is_uppercase))
        {
            indicators += 1;
        }

        let lower = query.to_lowercase();
        if ["this", "that", "these", "those", "specific"].iter().any(|d| lower.contains(d)) {
            indicators += 1;
        }
        if words.len() > 10 {
            indicators += 1;
        }

        (indicators as f32 / 5.0).min(1.0)
    }

    fn temporal_relevance(query: &str) -> f32 {
        let count = TEMPORAL_KEYWORDS.iter().filter(|k| query.contains(*k)).count();
        (count as f32 / 3.0).min(1.0)
    }

    fn domain_specificity(query: &str) -> f32 {
        let matches: usize = DOMAIN_KEYWORDS
            .iter()
            .map(|(_, keywords)| keywords.iter().filter(|k| query.contains(*k)).count())
            .sum();
        (matches as f32 / 5.0).min(1.0)
    }

    fn requires_factual(query: &str, intent: QueryIntent) -> bool {
        if matches!(
            intent,
            QueryIntent::FactualLookup | QueryIntent::TechnicalExplanation | QueryIntent::Comparison
        ) {
            return true;
        }
        FACTUAL_KEYWORDS.iter().any(|k| query.contains(k))
    }

    fn has_technical_terms(query: &str) -> bool {
        TECHNICAL_TERMS.iter().any(|t| query.contains(t))
    }

    fn estimate_expertise(lower: &str, original: &str, profile: Option<&UserProfile>) -> f32 {
        if let Some(level) = profile.and_then(|p| p.expertise_level) {
            return level.clamp(0.0, 1.0);
        }

        let mut score: f32 = 0.0;
        if Self::has_technical_terms(lower) {
            score += 0.3;
        }
        if original.split_whitespace().count() > 15 {
            score += 0.2;
        }
        if Self::specificity(original) > 0.5 {
            score += 0.2;
        }
        if ["implications", "architecture", "optimize", "trade-offs"]
            .iter()
            .any(|p| lower.contains(p))
        {
            score += 0.3;
        }

        score.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(query: &str) -> QueryCharacteristics {
        QueryAnalyzer::new().analyze(query, &[], None)
    }

    #[test]
    fn test_greeting_is_conversational() {
        let c = analyze("Hello, how are you?");
        assert_eq!(c.intent, QueryIntent::Conversational);
        assert_eq!(c.conversation_depth, 0);
        assert!(!c.requires_factual_accuracy);
    }

    #[test]
    fn test_documentation_question_is_factual() {
        let c = analyze("According to the documentation, what is the API rate limit?");
        assert_eq!(c.intent, QueryIntent::FactualLookup);
        assert!(c.requires_factual_accuracy);
        assert!(c.specificity_score > 0.0);
        assert!(c.has_technical_terms);
    }

    #[test]
    fn test_creative_intent() {
        let c = analyze("write a short story set in the ocean, then compose a poem about it");
        assert_eq!(c.intent, QueryIntent::CreativeGeneration);
        assert!(c.requires_creative_synthesis);
    }

    #[test]
    fn test_summarization_intent() {
        let c = analyze("summarize the key points of the quarterly report");
        assert_eq!(c.intent, QueryIntent::Summarization);
    }

    #[test]
    fn test_no_match_defaults_to_factual() {
        let c = analyze("rate limits");
        assert_eq!(c.intent, QueryIntent::FactualLookup);
    }

    #[test]
    fn test_complexity_signals_accumulate() {
        let simple = analyze("weather");
        let complex = analyze(
            "if the system architecture changes because of the migration, \
             which services break before and after, and also why?",
        );
        assert!(complex.complexity_score > simple.complexity_score);
        assert!(complex.complexity_score <= 1.0);
    }

    #[test]
    fn test_specificity_counts_signals() {
        let vague = analyze("tell me things");
        let specific =
            analyze("What changed in version 3.2 of the \"billing\" module for ACME accounts this quarter?");
        assert!(specific.specificity_score > vague.specificity_score);
        assert!(specific.specificity_score > 0.8);
    }

    #[test]
    fn test_temporal_relevance() {
        let c = analyze("what is the latest news today about the current release");
        assert!(c.temporal_relevance > 0.7);
    }

    #[test]
    fn test_expertise_profile_override() {
        let profile = UserProfile {
            expertise_level: Some(0.9),
        };
        let c = QueryAnalyzer::new().analyze("hi", &[], Some(&profile));
        assert!((c.user_expertise_level - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_conversation_depth() {
        let history = vec![
            ConversationTurn {
                role: "user".to_string(),
                content: "hi".to_string(),
            },
            ConversationTurn {
                role: "assistant".to_string(),
                content: "hello".to_string(),
            },
        ];
        let c = QueryAnalyzer::new().analyze("and then?", &history, None);
        assert_eq!(c.conversation_depth, 2);
    }
}
