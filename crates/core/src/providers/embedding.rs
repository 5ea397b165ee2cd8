use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::RetrievalError;
use crate::traits::EmbeddingProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedding service speaking a `POST /embed {"texts": [...]}` protocol
/// and answering `{"embeddings": [[...], ...]}`.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: &str, dimensions: usize) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: Url::parse(endpoint)?,
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "texts": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "embedder".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let embeddings: Vec<Vec<f32>> = parsed
            .pointer("/embeddings")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        if embeddings.len() != texts.len() {
            return Err(RetrievalError::BackendResponse {
                backend: "embedder".to_string(),
                details: format!(
                    "{} embeddings for {} texts",
                    embeddings.len(),
                    texts.len()
                ),
            });
        }
        for embedding in &embeddings {
            if embedding.len() != self.dimensions {
                return Err(RetrievalError::BackendResponse {
                    backend: "embedder".to_string(),
                    details: format!("dimension {} != {}", embedding.len(), self.dimensions),
                });
            }
        }
        Ok(embeddings)
    }
}

/// Deterministic hashed character-trigram embedder. No model, no network;
/// used for offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct NgramEmbeddingProvider {
    pub dimensions: usize,
}

impl Default for NgramEmbeddingProvider {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

impl NgramEmbeddingProvider {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for NgramEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
