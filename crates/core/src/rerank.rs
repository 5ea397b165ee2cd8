//! Second-stage reranking over fused candidates.
//!
//! Reranking is a strategy seam: the orchestrator holds a [`Reranker`]
//! and never knows whether scores come from a cross-encoder service or
//! a passthrough. A scoring failure is logged and degrades to the fused
//! order, never surfaced to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::RetrievalError;
use crate::models::SearchCandidate;
use crate::traits::ScoringModel;

/// Hard cap on how many candidates are sent to the scoring model.
pub const MAX_RERANK_CANDIDATES: usize = 100;

/// Query/passage pairs scored per request.
pub const SCORE_BATCH_SIZE: usize = 32;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` by relevance to `query` and truncate to `top_k`.
    ///
    /// Implementations must not fail: on any internal error they return
    /// the first `top_k` candidates in their incoming order.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate>;
}

#[async_trait]
impl<T: Reranker + ?Sized> Reranker for Arc<T> {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        (**self).rerank(query, candidates, top_k).await
    }
}

/// Reranker backed by a cross-encoder [`ScoringModel`].
pub struct CrossEncoderReranker<S> {
    scorer: S,
}

impl<S: ScoringModel> CrossEncoderReranker<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }

    async fn score_all(
        &self,
        query: &str,
        candidates: &[SearchCandidate],
    ) -> Result<Vec<f64>, RetrievalError> {
        let mut scores = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(SCORE_BATCH_SIZE) {
            let pairs: Vec<(String, String)> = batch
                .iter()
                .map(|c| (query.to_string(), c.chunk.content.clone()))
                .collect();
            let batch_scores = self.scorer.score(&pairs).await?;
            if batch_scores.len() != batch.len() {
                return Err(RetrievalError::Scoring(format!(
                    "scorer returned {} scores for {} pairs",
                    batch_scores.len(),
                    batch.len()
                )));
            }
            scores.extend(batch_scores.into_iter().map(f64::from));
        }
        Ok(scores)
    }
}

#[async_trait]
impl<S: ScoringModel> Reranker for CrossEncoderReranker<S> {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        candidates.truncate(MAX_RERANK_CANDIDATES);
        if candidates.is_empty() {
            return candidates;
        }

        match self.score_all(query, &candidates).await {
            Ok(scores) => {
                let mut order: Vec<usize> = (0..candidates.len()).collect();
                order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

                let mut taken: Vec<Option<SearchCandidate>> =
                    candidates.into_iter().map(Some).collect();
                order
                    .into_iter()
                    .take(top_k)
                    .filter_map(|slot| {
                        taken[slot].take().map(|mut c| {
                            c.score = scores[slot];
                            c
                        })
                    })
                    .collect()
            }
            Err(err) => {
                warn!(error = %err, "scoring failed, keeping fused order");
                candidates.truncate(top_k);
                candidates
            }
        }
    }
}

/// Keeps the fused order untouched. Used when no scoring model is configured.
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        candidates.truncate(top_k);
        candidates
    }
}
