//! End-to-end orchestrator scenarios over in-memory backends

use std::sync::Arc;

use ragweave_core::error::RagweaveError;
use ragweave_core::model::{Bot, Document};
use ragweave_providers::credentials::{CredentialResolver, ResolverConfig};
use ragweave_providers::mock::{MockEmbeddingProvider, MockLlmProvider};
use ragweave_providers::registry::ProviderRegistry;
use ragweave_retrieval::cache::{CacheConfig, ContextAwareCache};
use ragweave_retrieval::engine::AdaptiveRetrievalEngine;
use ragweave_retrieval::orchestrator::{HybridOrchestrator, OrchestratorConfig, QueryRequest};
use ragweave_retrieval::router::{RetrievalMode, RoutingStrategy};
use ragweave_retrieval::thresholds::ThresholdManager;
use ragweave_storage::memory::{
    MemoryBotStore, MemoryDocumentStore, MemoryKvStore, MemoryPerformanceLogStore,
    MemoryUserKeyStore, MemoryVectorStore,
};
use ragweave_storage::repository::{BotStore, DocumentStore, UserKeyStore};
use ragweave_storage::vector::{ChunkPayload, DistanceMetric, VectorPoint, VectorStore};
use uuid::Uuid;

struct Harness {
    orchestrator: HybridOrchestrator,
    bot: Bot,
    user: Uuid,
    documents: Arc<MemoryDocumentStore>,
    vector: Arc<MemoryVectorStore>,
    embedding: Arc<MockEmbeddingProvider>,
    llm: Arc<MockLlmProvider>,
    logs: Arc<MemoryPerformanceLogStore>,
}

async fn harness() -> Harness {
    let bots = Arc::new(MemoryBotStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let vector = Arc::new(MemoryVectorStore::new());
    let logs = Arc::new(MemoryPerformanceLogStore::new());
    let keys = Arc::new(MemoryUserKeyStore::new());
    let kv = Arc::new(MemoryKvStore::new());

    let embedding = Arc::new(MockEmbeddingProvider::new("openai", 8));
    let llm = Arc::new(MockLlmProvider::new("openai"));
    let registry = Arc::new(
        ProviderRegistry::new()
            .with_embedding(embedding.clone())
            .with_llm(llm.clone()),
    );

    let owner = Uuid::new_v4();
    let bot = Bot::new(owner, "support-bot", "openai", "text-embedding-3-small")
        .with_llm("openai", "gpt-4o-mini");
    bots.upsert(bot.clone()).await.unwrap();
    keys.set_key(owner, "openai", "sk-owner").await.unwrap();

    vector
        .create_collection(&bot.collection_name(), 8, DistanceMetric::Cosine)
        .await
        .unwrap();

    let thresholds = Arc::new(ThresholdManager::new(logs.clone()));
    let engine = Arc::new(AdaptiveRetrievalEngine::new(
        bots.clone() as Arc<dyn BotStore>,
        documents.clone() as Arc<dyn DocumentStore>,
        vector.clone(),
        thresholds,
    ));

    let credentials = Arc::new(CredentialResolver::new(
        bots.clone(),
        keys.clone() as Arc<dyn UserKeyStore>,
        registry.clone(),
        ResolverConfig::default(),
    ));

    let cache = Arc::new(ContextAwareCache::new(Some(kv), CacheConfig::default()));

    let orchestrator = HybridOrchestrator::new(
        Arc::new(RoutingStrategy::default()),
        cache,
        engine,
        credentials,
        registry,
        bots,
        documents.clone(),
        OrchestratorConfig::default(),
    );

    Harness {
        orchestrator,
        bot,
        user: Uuid::new_v4(),
        documents,
        vector,
        embedding,
        llm,
        logs,
    }
}

impl Harness {
    async fn seed_document(&self, filename: &str, chunk_text: &str) -> Uuid {
        let document_id = Uuid::new_v4();
        self.documents
            .upsert(Document {
                id: document_id,
                bot_id: self.bot.id,
                uploader_id: self.bot.owner_id,
                filename: filename.to_string(),
                file_path: format!("/data/{filename}"),
                file_size: chunk_text.len() as u64,
                chunk_count: 1,
            })
            .await
            .unwrap();

        self.vector
            .upsert(
                &self.bot.collection_name(),
                vec![VectorPoint {
                    id: Uuid::new_v4().to_string(),
                    vector: self.embedding.embed_text(chunk_text),
                    payload: ChunkPayload {
                        chunk_id: Uuid::new_v4(),
                        document_id,
                        bot_id: self.bot.id,
                        chunk_index: 0,
                        content: chunk_text.to_string(),
                    },
                }],
            )
            .await
            .unwrap();

        document_id
    }

    fn request(&self, query: &str) -> QueryRequest {
        QueryRequest {
            bot_id: self.bot.id,
            user_id: self.user,
            query: query.to_string(),
            history: Vec::new(),
            user_profile: None,
        }
    }
}

#[tokio::test]
async fn greeting_takes_pure_llm_path() {
    let h = harness().await;
    h.llm.set_response("Hi! I'm doing well, thanks for asking.");
    h.seed_document("guide.txt", "The API rate limit is 100 requests per minute.")
        .await;

    let response = h
        .orchestrator
        .answer_query(h.request("Hello, how are you?"))
        .await
        .unwrap();

    assert_eq!(response.mode_used, RetrievalMode::PureLlm);
    assert_eq!(response.content, "Hi! I'm doing well, thanks for asking.");
    assert!((response.confidence_score - 0.9).abs() < 1e-6);
    assert!((response.document_contribution - 0.0).abs() < 1e-6);
    assert!((response.llm_contribution - 1.0).abs() < 1e-6);
    assert_eq!(response.sources_used, vec!["LLM"]);
    // Retrieval was skipped entirely
    assert_eq!(h.embedding.embedding_calls(), 0);
}

#[tokio::test]
async fn factual_question_takes_document_heavy_path() {
    let h = harness().await;
    h.llm.set_response("The limit applies per account.");
    let query = "According to the documentation, what is the API rate limit?";
    let doc_id = h.seed_document("api.md", query).await;

    let response = h.orchestrator.answer_query(h.request(query)).await.unwrap();

    assert_eq!(response.mode_used, RetrievalMode::HybridDocumentHeavy);
    assert!(response.content.starts_with("Based on the available documents:"));
    assert!(response.sources_used.contains(&"LLM".to_string()));
    assert!(response.sources_used.contains(&doc_id.to_string()));
    assert!(response.document_contribution > 0.0);
}

#[tokio::test]
async fn large_corpus_shifts_threshold_cascade() {
    let h = harness().await;
    // Past the 100-document mark the cascade starts slightly higher:
    // openai default 0.7 plus the collection-size adjustment 0.02
    for i in 0..101 {
        h.documents
            .upsert(Document {
                id: Uuid::new_v4(),
                bot_id: h.bot.id,
                uploader_id: h.bot.owner_id,
                filename: format!("doc{i}.txt"),
                file_path: format!("/data/doc{i}.txt"),
                file_size: 64,
                chunk_count: 1,
            })
            .await
            .unwrap();
    }

    // No technical vocabulary, so no content-type delta interferes
    h.orchestrator
        .answer_query(h.request("According to the documentation, what is the rate limit?"))
        .await
        .unwrap();

    let records = h.logs.all();
    let first_attempt = records
        .iter()
        .find(|r| r.bot_id == h.bot.id)
        .expect("retrieval attempt was logged");
    assert!(
        (first_attempt.threshold_used - 0.72).abs() < 1e-4,
        "expected the >100-document delta in the starting threshold, got {}",
        first_attempt.threshold_used
    );
}

#[tokio::test]
async fn second_identical_query_hits_cache() {
    let h = harness().await;
    let query = "According to the documentation, what is the API rate limit?";
    h.seed_document("api.md", query).await;

    let first = h.orchestrator.answer_query(h.request(query)).await.unwrap();
    assert!(first.metadata.get("cache_hit").is_none());
    let llm_calls = h.llm.generate_calls();

    let second = h.orchestrator.answer_query(h.request(query)).await.unwrap();
    assert_eq!(
        second.metadata.get("cache_hit"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(second.content, first.content);
    assert_eq!(h.llm.generate_calls(), llm_calls);
}

#[tokio::test]
async fn provider_failures_degrade_to_fallback() {
    let h = harness().await;
    h.seed_document("api.md", "Some content.").await;
    h.llm.set_fail(true);
    h.embedding.set_fail_embeddings(true);

    let response = h
        .orchestrator
        .answer_query(h.request("According to the documentation, what is the API rate limit?"))
        .await
        .unwrap();

    // Both sides empty: the blender degrades but the caller still gets a
    // well-formed response
    assert!(!response.content.is_empty());
    assert!((response.document_contribution + response.llm_contribution) <= 1.0 + 1e-6);
}

#[tokio::test]
async fn missing_bot_is_not_found() {
    let h = harness().await;
    let request = QueryRequest {
        bot_id: Uuid::new_v4(),
        ..h.request("hello")
    };

    let err = h.orchestrator.answer_query(request).await.unwrap_err();
    assert!(matches!(err, RagweaveError::NotFound { .. }));
}

#[tokio::test]
async fn learning_loop_records_mode_performance() {
    let h = harness().await;
    h.seed_document("api.md", "The API rate limit is 100 requests per minute.")
        .await;

    h.orchestrator
        .answer_query(h.request("Hello, how are you?"))
        .await
        .unwrap();

    let effectiveness = h.orchestrator.mode_effectiveness();
    assert!(effectiveness.contains_key(&RetrievalMode::PureLlm));
}

#[tokio::test]
async fn optimize_retrieval_reports_empty_corpus() {
    let h = harness().await;
    let suggestions = h.orchestrator.optimize_retrieval(h.bot.id, 7).await.unwrap();
    assert!(suggestions
        .iter()
        .any(|s| s.suggestion_type == "document_collection"));
}
