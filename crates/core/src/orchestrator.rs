//! Query-side pipeline: intent targeting, optional hypothetical-answer
//! expansion, concurrent retrieval legs, rank fusion, and reranking.
//!
//! Each leg degrades independently. A failed embedding call, vector query,
//! or expansion is logged under the query's trace id and contributes
//! nothing; the pipeline only errors on an invalid request.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{cache_key, CacheStore, TieredCache};
use crate::error::RetrievalError;
use crate::fusion;
use crate::intent::{IntentClassifier, QueryIntent};
use crate::lexical::LexicalIndex;
use crate::models::{ChunkFilter, RetrievalRequest, SearchCandidate};
use crate::rerank::Reranker;
use crate::traits::{EmbeddingProvider, LlmProvider, VectorStore};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Multiplier on `top_k` for the global and lexical legs.
    pub oversample: usize,
    /// Multiplier on `top_k` for the section-targeted leg.
    pub targeted_oversample: usize,
    /// Queries shorter than this many whitespace tokens get expanded.
    pub hyde_min_tokens: usize,
    pub hyde_ttl: Duration,
    pub result_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            oversample: 3,
            targeted_oversample: 5,
            hyde_min_tokens: 10,
            hyde_ttl: Duration::hours(24),
            result_ttl: Duration::seconds(300),
        }
    }
}

pub struct RetrievalOrchestrator<E, V, L, R, S> {
    embedder: E,
    vector: V,
    llm: Option<L>,
    lexical: Arc<LexicalIndex>,
    reranker: R,
    cache: Arc<TieredCache<S>>,
    intents: IntentClassifier,
    config: OrchestratorConfig,
}

impl<E, V, L, R, S> RetrievalOrchestrator<E, V, L, R, S>
where
    E: EmbeddingProvider,
    V: VectorStore,
    L: LlmProvider,
    R: Reranker,
    S: CacheStore,
{
    pub fn new(
        embedder: E,
        vector: V,
        lexical: Arc<LexicalIndex>,
        reranker: R,
        cache: Arc<TieredCache<S>>,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            embedder,
            vector,
            llm: None,
            lexical,
            reranker,
            cache,
            intents: IntentClassifier::new()?,
            config: OrchestratorConfig::default(),
        })
    }

    pub fn with_llm(mut self, llm: L) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the full retrieval pipeline for one request.
    ///
    /// Returns at most `top_k` candidates. An empty result is an answer,
    /// not an error; the only error cases are malformed requests.
    pub async fn query(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        if request.text.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("empty query text".into()));
        }
        if request.top_k == 0 {
            return Err(RetrievalError::InvalidRequest("top_k must be positive".into()));
        }

        let result_key = cache_key(
            "search",
            &json!({
                "text": request.text,
                "user_id": request.user_id,
                "file_ids": request.file_ids,
                "top_k": request.top_k,
            }),
        );
        if let Some(hit) = self.cache.get::<Vec<SearchCandidate>>(&result_key) {
            return Ok(hit);
        }

        let trace_id = Uuid::new_v4();
        let intent = self.intents.classify(&request.text);
        debug!(%trace_id, intent = intent.as_str(), user_id = request.user_id, "query start");

        let search_text = self.expanded_query(trace_id, &request.text).await;
        let base_filter = request.filter();

        let embedding = match self.embedder.embed(&[search_text.clone()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => {
                warn!(%trace_id, "embedder returned no vectors, skipping vector legs");
                None
            }
            Err(err) => {
                warn!(%trace_id, error = %err, "embedding failed, skipping vector legs");
                None
            }
        };

        let targeted_filter = targeted_filter(&base_filter, intent);
        let targeted_k = request.top_k * self.config.targeted_oversample;
        let global_k = request.top_k * self.config.oversample;

        let lexical_leg = async { self.lexical.search(&request.text, &base_filter, global_k) };
        let (targeted, global, lexical) = match &embedding {
            Some(embedding) => tokio::join!(
                self.vector_leg(
                    trace_id,
                    &search_text,
                    embedding,
                    targeted_filter.as_ref(),
                    targeted_k
                ),
                self.vector_leg(trace_id, &search_text, embedding, Some(&base_filter), global_k),
                lexical_leg,
            ),
            None => (Vec::new(), Vec::new(), lexical_leg.await),
        };

        let semantic = merge_targeted_first(targeted, global);
        let fused = fusion::fuse(&[semantic, lexical]);
        debug!(%trace_id, candidates = fused.len(), "fused candidate pool");

        // Keyed on the tenant as well as the candidate ids, so one user's
        // cached ordering can never be served to another.
        let rerank_key = cache_key(
            "rerank",
            &json!({
                "text": request.text,
                "user_id": request.user_id,
                "file_ids": request.file_ids,
                "ids": fused.iter().map(|c| c.chunk.id.as_str()).collect::<Vec<_>>(),
                "top_k": request.top_k,
            }),
        );
        let mut results = match self.cache.get::<Vec<SearchCandidate>>(&rerank_key) {
            Some(hit) => hit,
            None => {
                let reranked = self
                    .reranker
                    .rerank(&request.text, fused, request.top_k)
                    .await;
                self.cache
                    .set(&rerank_key, &reranked, self.config.result_ttl);
                reranked
            }
        };
        promote_parents(&mut results);

        self.cache.set(&result_key, &results, self.config.result_ttl);
        Ok(results)
    }

    /// Expand short queries into a hypothetical answer passage, which
    /// embeds closer to real document text than the question itself.
    async fn expanded_query(&self, trace_id: Uuid, query: &str) -> String {
        let llm = match &self.llm {
            Some(llm) => llm,
            None => return query.to_string(),
        };
        if query.split_whitespace().count() >= self.config.hyde_min_tokens {
            return query.to_string();
        }

        let key = cache_key("hyde", &json!({ "query": query }));
        let prompt = format!(
            "Write a short, factual paragraph that would answer the question below, \
             as it might appear in a technical document. Question: {query}"
        );
        let expanded = self
            .cache
            .get_or_compute(&key, self.config.hyde_ttl, || async move {
                llm.complete(&prompt).await
            })
            .await;
        match expanded {
            Ok(passage) if !passage.trim().is_empty() => passage,
            Ok(_) => query.to_string(),
            Err(err) => {
                warn!(%trace_id, error = %err, "query expansion failed, using raw query");
                query.to_string()
            }
        }
    }

    /// One cached vector-store search. Errors degrade to an empty leg.
    async fn vector_leg(
        &self,
        trace_id: Uuid,
        search_text: &str,
        embedding: &[f32],
        filter: Option<&ChunkFilter>,
        k: usize,
    ) -> Vec<SearchCandidate> {
        let filter = match filter {
            Some(filter) => filter,
            None => return Vec::new(),
        };
        let key = cache_key(
            "retrieve",
            &json!({ "text": search_text, "filter": filter, "k": k }),
        );
        let leg = self
            .cache
            .get_or_compute(&key, self.config.result_ttl, || async move {
                self.vector.query(embedding, filter, k).await
            })
            .await;
        match leg {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(%trace_id, error = %err, "vector leg failed, contributing nothing");
                Vec::new()
            }
        }
    }
}

fn targeted_filter(base: &ChunkFilter, intent: QueryIntent) -> Option<ChunkFilter> {
    let sections = intent.target_sections();
    if sections.is_empty() {
        return None;
    }
    Some(
        base.clone()
            .with_sections(sections.iter().map(|s| s.to_string()).collect()),
    )
}

/// Concatenate the targeted and global legs, keeping the targeted copy of
/// any chunk both legs returned.
fn merge_targeted_first(
    targeted: Vec<SearchCandidate>,
    global: Vec<SearchCandidate>,
) -> Vec<SearchCandidate> {
    let mut merged = targeted;
    let seen: std::collections::HashSet<String> =
        merged.iter().map(|c| c.chunk.id.clone()).collect();
    merged.extend(
        global
            .into_iter()
            .filter(|c| !seen.contains(&c.chunk.id)),
    );
    merged
}

/// Small-to-big retrieval: child chunks matched for precision are answered
/// with their full parent passage.
fn promote_parents(results: &mut [SearchCandidate]) {
    for candidate in results {
        if candidate.chunk.is_child {
            if let Some(parent) = candidate.chunk.parent_content.take() {
                candidate.chunk.content = parent;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCacheStore;
    use crate::models::{test_chunk, Chunk, RetrievalSource};
    use crate::rerank::PassthroughReranker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    struct RecordingEmbedder {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            self.texts.lock().unwrap().extend(texts.iter().cloned());
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Err(RetrievalError::Scoring("embedder offline".into()))
        }
    }

    /// Returns every stored chunk that passes the filter, in insertion order.
    struct FakeVectorStore {
        chunks: Mutex<Vec<Chunk>>,
        queries: AtomicUsize,
    }

    impl FakeVectorStore {
        fn with_chunks(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks: Mutex::new(chunks),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VectorStore for FakeVectorStore {
        async fn add(&self, chunks: &[Chunk], _vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
            self.chunks.lock().unwrap().extend(chunks.iter().cloned());
            Ok(())
        }

        async fn query(
            &self,
            _embedding: &[f32],
            filter: &ChunkFilter,
            k: usize,
        ) -> Result<Vec<SearchCandidate>, RetrievalError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .chunks
                .lock()
                .unwrap()
                .iter()
                .filter(|c| filter.matches(c))
                .take(k)
                .map(|c| SearchCandidate::new(c.clone(), 0.9, RetrievalSource::Vector))
                .collect())
        }

        async fn list(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError> {
            Ok(self
                .chunks
                .lock()
                .unwrap()
                .iter()
                .filter(|c| filter.matches(c))
                .cloned()
                .collect())
        }
    }

    struct FailingVectorStore;

    #[async_trait]
    impl VectorStore for FailingVectorStore {
        async fn add(&self, _: &[Chunk], _: &[Vec<f32>]) -> Result<(), RetrievalError> {
            Err(RetrievalError::Scoring("down".into()))
        }

        async fn query(
            &self,
            _: &[f32],
            _: &ChunkFilter,
            _: usize,
        ) -> Result<Vec<SearchCandidate>, RetrievalError> {
            Err(RetrievalError::BackendResponse {
                backend: "vector".into(),
                details: "down".into(),
            })
        }

        async fn list(&self, _: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError> {
            Err(RetrievalError::Scoring("down".into()))
        }
    }

    struct CountingLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("A hypothetical answer passage about attention.".into())
        }
    }

    struct NoLlm;

    #[async_trait]
    impl LlmProvider for NoLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, RetrievalError> {
            unreachable!("not configured in this test")
        }
    }

    fn cache() -> Arc<TieredCache<SqliteCacheStore>> {
        Arc::new(TieredCache::new(
            64,
            SqliteCacheStore::open_in_memory().unwrap(),
        ))
    }

    fn orchestrator_with(
        chunks: Vec<Chunk>,
    ) -> RetrievalOrchestrator<
        FixedEmbedder,
        FakeVectorStore,
        NoLlm,
        PassthroughReranker,
        SqliteCacheStore,
    > {
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        RetrievalOrchestrator::new(
            FixedEmbedder,
            FakeVectorStore::with_chunks(chunks),
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_empty_query_text() {
        let orchestrator = orchestrator_with(vec![]);
        let err = orchestrator
            .query(&RetrievalRequest::new("   ", 1, 5))
            .await;
        assert!(matches!(err, Err(RetrievalError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn never_returns_chunks_from_other_tenants() {
        let chunks = vec![
            test_chunk("mine", 1, "transformer attention layers"),
            test_chunk("theirs", 2, "transformer attention layers"),
        ];
        let orchestrator = orchestrator_with(chunks);
        let results = orchestrator
            .query(&RetrievalRequest::new("transformer attention", 1, 10))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|c| c.chunk.user_id == 1));
    }

    #[tokio::test]
    async fn rerank_cache_is_scoped_per_tenant() {
        // Both tenants hold a chunk with the same id, so a rerank cache
        // entry keyed on ids alone would serve tenant 1's chunks to
        // tenant 2 on the second, identical query.
        let chunks = vec![
            test_chunk("x", 1, "shared retrieval corpus entry"),
            test_chunk("x", 2, "shared retrieval corpus entry"),
        ];
        let orchestrator = orchestrator_with(chunks);

        let warm = orchestrator
            .query(&RetrievalRequest::new("shared retrieval corpus", 1, 5))
            .await
            .unwrap();
        assert!(!warm.is_empty());
        assert!(warm.iter().all(|c| c.chunk.user_id == 1));

        let results = orchestrator
            .query(&RetrievalRequest::new("shared retrieval corpus", 2, 5))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|c| c.chunk.user_id == 2));
    }

    #[tokio::test]
    async fn expansion_replaces_the_query_for_embedding() {
        let chunks = vec![test_chunk("a", 1, "attention is all you need")];
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        let orchestrator = RetrievalOrchestrator::new(
            RecordingEmbedder {
                texts: Mutex::new(Vec::new()),
            },
            FakeVectorStore::with_chunks(chunks),
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap()
        .with_llm(CountingLlm {
            calls: AtomicUsize::new(0),
        });

        let _ = orchestrator
            .query(&RetrievalRequest::new("attention", 1, 5))
            .await
            .unwrap();

        let embedded = orchestrator.embedder.texts.lock().unwrap();
        assert_eq!(
            embedded.as_slice(),
            ["A hypothetical answer passage about attention."]
        );
    }

    #[tokio::test]
    async fn embedding_failure_still_serves_lexical_results() {
        let chunks = vec![test_chunk("a", 1, "gradient descent optimizer schedule")];
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        let orchestrator: RetrievalOrchestrator<_, _, NoLlm, _, _> = RetrievalOrchestrator::new(
            FailingEmbedder,
            FakeVectorStore::with_chunks(chunks),
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap();

        let results = orchestrator
            .query(&RetrievalRequest::new("gradient descent", 1, 5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn total_backend_failure_returns_empty_not_error() {
        let lexical = Arc::new(LexicalIndex::new());
        let orchestrator: RetrievalOrchestrator<_, _, NoLlm, _, _> = RetrievalOrchestrator::new(
            FixedEmbedder,
            FailingVectorStore,
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap();

        let results = orchestrator
            .query(&RetrievalRequest::new("anything at all", 1, 5))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn child_chunks_answer_with_parent_content() {
        let mut child = test_chunk("child", 1, "the adam optimizer update");
        child.is_child = true;
        child.parent_content = Some("full passage describing the adam optimizer update".into());
        let orchestrator = orchestrator_with(vec![child]);

        let results = orchestrator
            .query(&RetrievalRequest::new("adam optimizer", 1, 5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].chunk.content,
            "full passage describing the adam optimizer update"
        );
    }

    #[tokio::test]
    async fn short_queries_are_expanded_once_and_cached() {
        let chunks = vec![test_chunk("a", 1, "attention is all you need")];
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = RetrievalOrchestrator::new(
            FixedEmbedder,
            FakeVectorStore::with_chunks(chunks),
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap()
        .with_llm(llm.clone());

        // Two distinct requests share the expansion cache entry.
        let _ = orchestrator
            .query(&RetrievalRequest::new("attention", 1, 5))
            .await
            .unwrap();
        let _ = orchestrator
            .query(&RetrievalRequest::new("attention", 1, 3))
            .await
            .unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn long_queries_skip_expansion() {
        let chunks = vec![test_chunk("a", 1, "positional encodings in transformers")];
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        let orchestrator = RetrievalOrchestrator::new(
            FixedEmbedder,
            FakeVectorStore::with_chunks(chunks),
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap()
        .with_llm(NoLlm);

        // Ten tokens, at the threshold, so the llm must not be called.
        let results = orchestrator
            .query(&RetrievalRequest::new(
                "how do positional encodings work in transformers across long sequences",
                1,
                5,
            ))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_result_cache() {
        let chunks = vec![test_chunk("a", 1, "batch normalization statistics")];
        let lexical = Arc::new(LexicalIndex::new());
        lexical.build(chunks.clone());
        let store = FakeVectorStore::with_chunks(chunks);
        let orchestrator: RetrievalOrchestrator<_, _, NoLlm, _, _> = RetrievalOrchestrator::new(
            FixedEmbedder,
            store,
            lexical,
            PassthroughReranker,
            cache(),
        )
        .unwrap();

        let request = RetrievalRequest::new("batch normalization", 1, 5);
        let first = orchestrator.query(&request).await.unwrap();
        let before = orchestrator.vector.queries.load(Ordering::SeqCst);
        let second = orchestrator.query(&request).await.unwrap();
        let after = orchestrator.vector.queries.load(Ordering::SeqCst);

        assert_eq!(first.len(), second.len());
        assert_eq!(before, after);
    }
}
