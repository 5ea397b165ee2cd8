use crate::error::{IngestError, RetrievalError};
use crate::models::{Chunk, ChunkFilter, RawChunk, SearchCandidate};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Turns text into embedding vectors. Implementations are expected to be
/// deterministic for a given input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// External vector database holding indexed chunks and their embeddings.
///
/// Every `query` and `list` call carries a [`ChunkFilter`], so the tenant
/// scope is enforced inside the store, not after the fact.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RetrievalError>;

    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<SearchCandidate>, RetrievalError>;

    /// Enumerate every chunk in the filter's scope. This is the corpus of
    /// record for lexical index rebuilds.
    async fn list(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError>;
}

/// Cross-encoder relevance scorer over (query, passage) pairs.
#[async_trait]
pub trait ScoringModel: Send + Sync {
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RetrievalError>;
}

/// Language model completion, used only for hypothetical-answer expansion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, RetrievalError>;
}

/// Structured document parser. The academic PDF implementation chunks
/// internally (layout-aware), so its output is chunk-ready.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<RawChunk>, IngestError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        (**self).embed(texts).await
    }
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
        (**self).add(chunks, vectors).await
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        (**self).query(embedding, filter, k).await
    }

    async fn list(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError> {
        (**self).list(filter).await
    }
}

#[async_trait]
impl<T: ScoringModel + ?Sized> ScoringModel for Arc<T> {
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RetrievalError> {
        (**self).score(pairs).await
    }
}

#[async_trait]
impl<T: LlmProvider + ?Sized> LlmProvider for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String, RetrievalError> {
        (**self).complete(prompt).await
    }
}
