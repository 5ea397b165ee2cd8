pub mod cache;
pub mod chunking;
pub mod error;
pub mod extractor;
pub mod fusion;
pub mod ingest;
pub mod intent;
pub mod lexical;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod providers;
pub mod rerank;
pub mod traits;

pub use cache::{cache_key, CacheStore, SqliteCacheStore, TieredCache};
pub use chunking::{classify_importance, normalize_whitespace, split_text, ParentChildChunker};
pub use error::{CacheError, IngestError, RetrievalError};
pub use extractor::{extract_page_texts, PageText};
pub use fusion::{fuse, RRF_K};
pub use ingest::{IngestionCoordinator, IngestionJob, IngestionStatus, JobStore};
pub use intent::{IntentClassifier, QueryIntent};
pub use lexical::LexicalIndex;
pub use models::{
    Chunk, ChunkFilter, Importance, RawChunk, RetrievalRequest, RetrievalSource, SearchCandidate,
};
pub use orchestrator::{OrchestratorConfig, RetrievalOrchestrator};
pub use parser::AcademicPdfParser;
pub use providers::{
    HttpEmbeddingProvider, HttpLlmProvider, HttpScoringModel, NgramEmbeddingProvider,
    QdrantVectorStore,
};
pub use rerank::{CrossEncoderReranker, PassthroughReranker, Reranker};
pub use traits::{DocumentParser, EmbeddingProvider, LlmProvider, ScoringModel, VectorStore};
