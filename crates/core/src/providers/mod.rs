//! Concrete backends behind the retrieval traits.

pub mod embedding;
pub mod llm;
pub mod qdrant;
pub mod scoring;

pub use embedding::{HttpEmbeddingProvider, NgramEmbeddingProvider};
pub use llm::HttpLlmProvider;
pub use qdrant::QdrantVectorStore;
pub use scoring::HttpScoringModel;
