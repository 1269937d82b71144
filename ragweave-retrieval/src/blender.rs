//! Response blending: six synthesis strategies over LLM text and chunks
//!
//! Each strategy is a pure function of the LLM text, the retrieved
//! chunks, the routing decision and the query. After blending, word-set
//! overlap against each source estimates the document/LLM contribution
//! split, and a density score classifies the information content.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

use crate::engine::RetrievedChunk;
use crate::router::{RetrievalDecision, RetrievalMode};

/// Sealed set of synthesis strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// Return the LLM response verbatim
    LlmGeneration,
    /// Concatenate top chunks as a numbered list
    DocumentExtraction,
    /// Weight-driven combination of both sources
    WeightedCombination,
    /// LLM paragraph followed by formatted supporting documents
    LlmEnhancedDocuments,
    /// Key sentences from chunks, optionally with LLM analysis
    ExtractiveSummarization,
    /// Per-document key points with an LLM synthesis
    ComparativeSynthesis,
    /// LLM text enriched with extracted key facts
    CreativeBlending,
}

/// Information density of a blended response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InformationDensity {
    /// Near-empty content
    VeryLow,
    /// Sparse content
    Low,
    /// Average content
    Medium,
    /// Dense content
    High,
    /// Very dense content
    VeryHigh,
}

/// Response from the hybrid retrieval system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResponse {
    /// Blended answer text
    pub content: String,
    /// Mode that produced the answer
    pub mode_used: RetrievalMode,
    /// Source identifiers: "LLM" and/or document ids
    pub sources_used: Vec<String>,
    /// Routing confidence carried through
    pub confidence_score: f32,
    /// Density classification of the content
    pub information_density: InformationDensity,
    /// End-to-end processing time in seconds
    pub processing_time: f64,
    /// Fraction of the answer attributable to documents
    pub document_contribution: f32,
    /// Fraction of the answer attributable to the LLM
    pub llm_contribution: f32,
    /// Free-form response metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Blender applying the decision's synthesis strategy.
#[derive(Debug, Clone, Default)]
pub struct ResponseBlender;

impl ResponseBlender {
    /// Create a blender.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Blend the LLM response and retrieved chunks per the decision.
    #[must_use]
    pub fn blend(
        &self,
        llm_response: Option<&str>,
        chunks: &[RetrievedChunk],
        decision: &RetrievalDecision,
        query: &str,
    ) -> HybridResponse {
        let start = Instant::now();

        let content = match decision.synthesis_strategy {
            SynthesisStrategy::LlmGeneration => Self::llm_generation(llm_response),
            SynthesisStrategy::DocumentExtraction => Self::document_extraction(chunks),
            SynthesisStrategy::WeightedCombination => {
                Self::weighted_combination(llm_response, chunks, decision)
            }
            SynthesisStrategy::LlmEnhancedDocuments => {
                Self::llm_enhanced_documents(llm_response, chunks)
            }
            SynthesisStrategy::ExtractiveSummarization => {
                Self::extractive_summarization(llm_response, chunks)
            }
            SynthesisStrategy::ComparativeSynthesis => {
                Self::comparative_synthesis(llm_response, chunks)
            }
            SynthesisStrategy::CreativeBlending => Self::creative_blending(llm_response, chunks),
        };

        let (document_contribution, llm_contribution) =
            Self::contributions(&content, llm_response, chunks);
        let information_density = Self::information_density(&content);
        let sources_used = Self::sources(llm_response, chunks);

        let mut metadata = HashMap::new();
        metadata.insert(
            "synthesis_strategy".to_string(),
            serde_json::json!(decision.synthesis_strategy),
        );
        metadata.insert(
            "document_count".to_string(),
            serde_json::json!(chunks.len()),
        );
        metadata.insert("query_length".to_string(), serde_json::json!(query.len()));

        HybridResponse {
            content,
            mode_used: decision.mode,
            sources_used,
            confidence_score: decision.confidence,
            information_density,
            processing_time: start.elapsed().as_secs_f64(),
            document_contribution,
            llm_contribution,
            metadata,
        }
    }

    fn llm_generation(llm_response: Option<&str>) -> String {
        llm_response
            .unwrap_or("Unable to generate response.")
            .to_string()
    }

    fn document_extraction(chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return "No relevant documents found.".to_string();
        }
        Self::format_document_response(chunks)
    }

    fn weighted_combination(
        llm_response: Option<&str>,
        chunks: &[RetrievedChunk],
        decision: &RetrievalDecision,
    ) -> String {
        match (llm_response, chunks.is_empty()) {
            (None, true) => "Unable to generate response.".to_string(),
            (Some(llm), true) => llm.to_string(),
            (None, false) => Self::format_document_response(chunks),
            (Some(llm), false) => {
                let doc_info = Self::extract_key_information(chunks);
                if decision.document_weight >= 0.7 {
                    Self::document_focused_blend(&doc_info, llm)
                } else if decision.llm_weight >= 0.7 {
                    Self::llm_focused_blend(llm, &doc_info)
                } else {
                    Self::balanced_blend(llm, &doc_info)
                }
            }
        }
    }

    fn llm_enhanced_documents(llm_response: Option<&str>, chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return llm_response
                .unwrap_or("No relevant documents found.")
                .to_string();
        }

        let doc_content = Self::format_document_response(chunks);
        match llm_response {
            Some(llm) => format!("{llm}\n\n**Supporting Information:**\n{doc_content}"),
            None => doc_content,
        }
    }

    fn extractive_summarization(llm_response: Option<&str>, chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return llm_response.unwrap_or("No documents to summarize.").to_string();
        }

        let sentences = Self::extract_key_sentences(chunks);
        let mut summary = "Summary of relevant information:\n\n".to_string();
        for (i, sentence) in sentences.iter().take(5).enumerate() {
            summary.push_str(&format!("{}. {sentence}\n", i + 1));
        }

        if let Some(llm) = llm_response {
            summary.push_str(&format!("\n**Analysis:** {llm}"));
        }
        summary
    }

    fn comparative_synthesis(llm_response: Option<&str>, chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return llm_response.unwrap_or("No documents for comparison.").to_string();
        }

        let grouped = Self::group_by_document(chunks);
        let mut comparison = "Comparative Analysis:\n\n".to_string();

        for (document_id, group) in &grouped {
            comparison.push_str(&format!("**{document_id}:**\n"));
            for point in Self::extract_key_points(group).iter().take(3) {
                comparison.push_str(&format!("\u{2022} {point}\n"));
            }
            comparison.push('\n');
        }

        if let Some(llm) = llm_response {
            comparison.push_str(&format!("**Synthesis:** {llm}"));
        }
        comparison
    }

    fn creative_blending(llm_response: Option<&str>, chunks: &[RetrievedChunk]) -> String {
        let Some(llm) = llm_response else {
            return if chunks.is_empty() {
                String::new()
            } else {
                Self::format_document_response(chunks)
            };
        };

        if chunks.is_empty() {
            return llm.to_string();
        }

        let facts = Self::extract_facts(chunks);
        let mut enhanced = llm.to_string();
        if !facts.is_empty() {
            enhanced.push_str("\n\n**Key Facts:**\n");
            for fact in facts.iter().take(3) {
                enhanced.push_str(&format!("\u{2022} {fact}\n"));
            }
        }
        enhanced
    }

    fn extract_key_information(chunks: &[RetrievedChunk]) -> Vec<String> {
        let mut info = Vec::new();
        for chunk in chunks.iter().take(5) {
            for sentence in chunk.content.split('.') {
                let trimmed = sentence.trim();
                if trimmed.len() > 20 {
                    info.push(format!("{trimmed}."));
                    if info.len() >= 5 {
                        return info;
                    }
                }
            }
        }
        info
    }

    fn document_focused_blend(doc_info: &[String], llm_response: &str) -> String {
        let mut response = "Based on the available documents:\n\n".to_string();
        for info in doc_info.iter().take(3) {
            response.push_str(&format!("\u{2022} {info}\n"));
        }
        if !llm_response.is_empty() {
            response.push_str(&format!("\n{llm_response}"));
        }
        response
    }

    fn llm_focused_blend(llm_response: &str, doc_info: &[String]) -> String {
        let mut response = llm_response.to_string();
        if !doc_info.is_empty() {
            response.push_str("\n\n**Additional Context from Documents:**\n");
            for info in doc_info.iter().take(2) {
                response.push_str(&format!("\u{2022} {info}\n"));
            }
        }
        response
    }

    fn balanced_blend(llm_response: &str, doc_info: &[String]) -> String {
        let llm_parts: Vec<&str> = llm_response.split("\n\n").collect();
        let mut response = String::new();

        for (i, part) in llm_parts.iter().enumerate() {
            response.push_str(part);
            if let Some(info) = doc_info.get(i) {
                response.push_str(&format!("\n\n[From documents: {info}]\n\n"));
            }
        }
        for remaining in doc_info.iter().skip(llm_parts.len()) {
            response.push_str(&format!("\n\u{2022} {remaining}"));
        }
        response
    }

    fn format_document_response(chunks: &[RetrievedChunk]) -> String {
        let mut response = "Relevant information from documents:\n\n".to_string();

        for (i, chunk) in chunks.iter().take(5).enumerate() {
            let text = chunk.content.trim();
            if text.is_empty() {
                continue;
            }
            if text.len() > 500 {
                let cut: String = text.chars().take(500).collect();
                response.push_str(&format!("{}. {cut}...\n\n", i + 1));
            } else {
                response.push_str(&format!("{}. {text}\n\n", i + 1));
            }
        }
        response.trim_end().to_string()
    }

    fn extract_key_sentences(chunks: &[RetrievedChunk]) -> Vec<String> {
        let mut sentences = Vec::new();
        for chunk in chunks {
            let chunk_sentences: Vec<String> = chunk
                .content
                .split('.')
                .map(str::trim)
                .filter(|s| s.len() > 20)
                .map(ToString::to_string)
                .take(2)
                .collect();
            sentences.extend(chunk_sentences);
        }
        sentences.truncate(10);
        sentences
    }

    fn group_by_document(chunks: &[RetrievedChunk]) -> BTreeMap<Uuid, Vec<RetrievedChunk>> {
        let mut grouped: BTreeMap<Uuid, Vec<RetrievedChunk>> = BTreeMap::new();
        for chunk in chunks {
            grouped.entry(chunk.document_id).or_default().push(chunk.clone());
        }
        grouped
    }

    fn extract_key_points(chunks: &[RetrievedChunk]) -> Vec<String> {
        let mut points = Vec::new();
        for chunk in chunks {
            for line in chunk.content.lines() {
                let trimmed = line.trim();
                if trimmed.starts_with(['\u{2022}', '-', '*', '1', '2', '3']) {
                    points.push(trimmed.to_string());
                }
            }
        }
        points.truncate(5);
        points
    }

    fn extract_facts(chunks: &[RetrievedChunk]) -> Vec<String> {
        let mut facts = Vec::new();
        for chunk in chunks {
            for sentence in chunk.content.split('.') {
                let trimmed = sentence.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let has_digit = trimmed.chars().any(|c| c.is_ascii_digit());
                let lower = trimmed.to_lowercase();
                let has_copula = [" is ", " are ", " was ", " were ", "defined as"]
                    .iter()
                    .any(|t| lower.contains(t));
                if has_digit || has_copula {
                    facts.push(format!("{trimmed}."));
                }
            }
        }
        facts.truncate(5);
        facts
    }

    /// Word-set overlap of the blended text against each source,
    /// normalized so the two contributions sum to 1 (when either is
    /// non-zero).
    fn contributions(
        blended: &str,
        llm_response: Option<&str>,
        chunks: &[RetrievedChunk],
    ) -> (f32, f32) {
        if blended.is_empty() {
            return (0.0, 0.0);
        }

        let blended_words: HashSet<String> = blended
            .to_lowercase()
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        if blended_words.is_empty() {
            return (0.0, 0.0);
        }

        let overlap_with = |text: &str| -> f32 {
            let words: HashSet<String> = text
                .to_lowercase()
                .split_whitespace()
                .map(ToString::to_string)
                .collect();
            let overlap = words.intersection(&blended_words).count() as f32;
            ((overlap / blended_words.len() as f32) * 1.5).min(1.0)
        };

        let mut doc_contribution = 0.0;
        if !chunks.is_empty() {
            let doc_text: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            doc_contribution = overlap_with(&doc_text.join(" "));
        }

        let mut llm_contribution = 0.0;
        if let Some(llm) = llm_response {
            llm_contribution = overlap_with(llm);
        }

        let total = doc_contribution + llm_contribution;
        if total > 0.0 {
            (doc_contribution / total, llm_contribution / total)
        } else {
            (0.0, 0.0)
        }
    }

    /// Classify the information density of arbitrary response content.
    #[must_use]
    pub fn assess_density(content: &str) -> InformationDensity {
        Self::information_density(content)
    }

    fn information_density(content: &str) -> InformationDensity {
        if content.is_empty() {
            return InformationDensity::VeryLow;
        }

        let word_count = content.split_whitespace().count();
        let has_numbers = content.chars().any(|c| c.is_ascii_digit());
        let has_lists = ["\u{2022}", "-", "1.", "2."].iter().any(|m| content.contains(m));
        let lower = content.to_lowercase();
        let has_technical = ["algorithm", "system", "process", "method", "technique"]
            .iter()
            .any(|t| lower.contains(t));

        let mut score = 0.0;
        if word_count > 200 {
            score += 0.3;
        }
        if has_numbers {
            score += 0.2;
        }
        if has_lists {
            score += 0.2;
        }
        if has_technical {
            score += 0.3;
        }

        if score >= 0.8 {
            InformationDensity::VeryHigh
        } else if score >= 0.6 {
            InformationDensity::High
        } else if score >= 0.4 {
            InformationDensity::Medium
        } else if score >= 0.2 {
            InformationDensity::Low
        } else {
            InformationDensity::VeryLow
        }
    }

    fn sources(llm_response: Option<&str>, chunks: &[RetrievedChunk]) -> Vec<String> {
        let mut sources = Vec::new();
        if llm_response.is_some() {
            sources.push("LLM".to_string());
        }
        for chunk in chunks {
            let id = chunk.document_id.to_string();
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutingStrategy;

    fn chunk(content: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: Uuid::new_v4().to_string(),
            score: 0.8,
            content: content.to_string(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
        }
    }

    fn decision(strategy: SynthesisStrategy, doc_weight: f32, llm_weight: f32) -> RetrievalDecision {
        RetrievalDecision {
            mode: RetrievalMode::HybridBalanced,
            confidence: 0.8,
            document_weight: doc_weight,
            llm_weight,
            retrieval_depth: 5,
            synthesis_strategy: strategy,
            rationale: String::new(),
            fallback_modes: vec![],
        }
    }

    #[test]
    fn test_llm_generation_verbatim() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::LlmGeneration, 0.0, 1.0);
        let response = blender.blend(Some("hello there"), &[], &d, "hi");

        assert_eq!(response.content, "hello there");
        assert!((response.document_contribution - 0.0).abs() < 1e-6);
        assert!((response.llm_contribution - 1.0).abs() < 1e-6);
        assert_eq!(response.sources_used, vec!["LLM"]);
    }

    #[test]
    fn test_document_extraction_numbered() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::DocumentExtraction, 1.0, 0.0);
        let chunks = vec![chunk("First chunk text."), chunk("Second chunk text.")];
        let response = blender.blend(None, &chunks, &d, "q");

        assert!(response.content.starts_with("Relevant information from documents:"));
        assert!(response.content.contains("1. First chunk text."));
        assert!(response.content.contains("2. Second chunk text."));
    }

    #[test]
    fn test_document_extraction_empty() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::DocumentExtraction, 1.0, 0.0);
        let response = blender.blend(None, &[], &d, "q");
        assert_eq!(response.content, "No relevant documents found.");
    }

    #[test]
    fn test_weighted_combination_document_heavy() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::WeightedCombination, 0.7, 0.3);
        let chunks = vec![chunk(
            "The API rate limit is 100 requests per minute for standard accounts.",
        )];
        let response = blender.blend(Some("Rate limits protect the service."), &chunks, &d, "q");

        assert!(response.content.starts_with("Based on the available documents:"));
        assert!(response.content.contains("100 requests per minute"));
        assert!(response.content.contains("Rate limits protect the service."));
    }

    #[test]
    fn test_weighted_combination_llm_heavy() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::WeightedCombination, 0.2, 0.8);
        let chunks = vec![chunk(
            "The retention policy keeps backups for thirty days by default.",
        )];
        let response = blender.blend(Some("Backups are kept for a while."), &chunks, &d, "q");

        assert!(response.content.starts_with("Backups are kept for a while."));
        assert!(response
            .content
            .contains("**Additional Context from Documents:**"));
    }

    #[test]
    fn test_weighted_combination_balanced_interleaves() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::WeightedCombination, 0.5, 0.5);
        let chunks = vec![chunk(
            "Deployments run every weekday morning at nine according to the runbook.",
        )];
        let response = blender.blend(
            Some("First paragraph.\n\nSecond paragraph."),
            &chunks,
            &d,
            "q",
        );
        assert!(response.content.contains("[From documents:"));
    }

    #[test]
    fn test_llm_enhanced_documents() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::LlmEnhancedDocuments, 0.6, 0.4);
        let chunks = vec![chunk("Supporting fact from the knowledge base.")];
        let response = blender.blend(Some("Lead paragraph."), &chunks, &d, "q");

        assert!(response.content.starts_with("Lead paragraph."));
        assert!(response.content.contains("**Supporting Information:**"));
    }

    #[test]
    fn test_extractive_summarization() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::ExtractiveSummarization, 0.6, 0.4);
        let chunks = vec![chunk(
            "The first important finding concerns latency budgets. \
             The second important finding concerns error budgets. Short.",
        )];
        let response = blender.blend(Some("Overall both budgets shrank."), &chunks, &d, "q");

        assert!(response.content.starts_with("Summary of relevant information:"));
        assert!(response.content.contains("1. "));
        assert!(response.content.contains("**Analysis:** Overall both budgets shrank."));
        // Sentences at or under 20 chars are filtered out
        assert!(!response.content.contains("Short"));
    }

    #[test]
    fn test_comparative_synthesis_groups_by_document() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::ComparativeSynthesis, 0.5, 0.5);
        let chunks = vec![
            chunk("- option one is cheaper\n- option one is slower"),
            chunk("- option two is faster"),
        ];
        let response = blender.blend(Some("Pick by workload."), &chunks, &d, "q");

        assert!(response.content.starts_with("Comparative Analysis:"));
        assert!(response.content.contains("**Synthesis:** Pick by workload."));
        assert!(response.content.contains("- option one is cheaper"));
    }

    #[test]
    fn test_creative_blending_appends_facts() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::CreativeBlending, 0.3, 0.7);
        let chunks = vec![chunk("The launch happened in 2019. The team is distributed.")];
        let response = blender.blend(Some("A story about the launch."), &chunks, &d, "q");

        assert!(response.content.starts_with("A story about the launch."));
        assert!(response.content.contains("**Key Facts:**"));
        assert!(response.content.contains("2019"));
    }

    #[test]
    fn test_creative_blending_no_facts_no_section() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::CreativeBlending, 0.3, 0.7);
        let response = blender.blend(Some("Just a story."), &[], &d, "q");
        assert_eq!(response.content, "Just a story.");
    }

    #[test]
    fn test_contributions_normalize() {
        let blender = ResponseBlender::new();
        let d = decision(SynthesisStrategy::WeightedCombination, 0.5, 0.5);
        let chunks = vec![chunk("alpha beta gamma delta chunks only words here")];
        let response = blender.blend(Some("completely different llm phrasing"), &chunks, &d, "q");

        let total = response.document_contribution + response.llm_contribution;
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_information_density_mapping() {
        // Technical + numbers + lists = 0.7 => HIGH
        let dense = "The system algorithm processes 42 items.\n\u{2022} first\n\u{2022} second";
        let d = decision(SynthesisStrategy::LlmGeneration, 0.0, 1.0);
        let response = ResponseBlender::new().blend(Some(dense), &[], &d, "q");
        assert_eq!(response.information_density, InformationDensity::High);

        let sparse = ResponseBlender::new().blend(Some("ok"), &[], &d, "q");
        assert_eq!(sparse.information_density, InformationDensity::VeryLow);
    }

    #[test]
    fn test_sources_dedup_documents() {
        let doc = Uuid::new_v4();
        let mut a = chunk("one");
        let mut b = chunk("two");
        a.document_id = doc;
        b.document_id = doc;

        let d = decision(SynthesisStrategy::WeightedCombination, 0.5, 0.5);
        let response = ResponseBlender::new().blend(Some("llm"), &[a, b], &d, "q");
        assert_eq!(response.sources_used.len(), 2); // "LLM" + one doc id
    }
}
