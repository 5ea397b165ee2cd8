//! Qdrant-backed [`VectorStore`].
//!
//! Every point carries the full chunk as payload plus flat fields for
//! filtering. Tenant scope is pushed into the Qdrant filter on every
//! query and scroll; results are additionally re-checked locally so the
//! section-substring semantics match the in-memory filter exactly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::RetrievalError;
use crate::models::{Chunk, ChunkFilter, RetrievalSource, SearchCandidate};
use crate::traits::VectorStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SCROLL_PAGE: usize = 256;

pub struct QdrantVectorStore {
    client: Client,
    endpoint: Url,
    collection: String,
    vector_size: usize,
}

impl QdrantVectorStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}collections/{}{}",
            self.endpoint, self.collection, suffix
        )
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let response = self.client.get(self.collection_url("")).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if !response.status().is_client_error() {
            return Err(RetrievalError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    fn filter_json(filter: &ChunkFilter) -> Value {
        let mut must = vec![json!({ "key": "user_id", "match": { "value": filter.user_id } })];
        if let Some(file_ids) = &filter.file_ids {
            must.push(json!({ "key": "file_id", "match": { "any": file_ids } }));
        }
        if let Some(sections) = &filter.sections {
            // The server-side match on `section_lc` is exact, while
            // `ChunkFilter::matches` tests case-insensitive containment.
            // This exact match is only a pre-filter: every result is
            // re-checked locally with `ChunkFilter::matches`, which is
            // the authoritative semantics if the two ever disagree.
            let lowered: Vec<String> = sections.iter().map(|s| s.to_lowercase()).collect();
            must.push(json!({ "key": "section_lc", "match": { "any": lowered } }));
        }
        json!({ "must": must })
    }

    fn chunk_from_payload(payload: &Value) -> Option<Chunk> {
        let value = payload.get("chunk")?.clone();
        serde_json::from_value(value).ok()
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
        if chunks.len() != vectors.len() {
            return Err(RetrievalError::InvalidRequest(format!(
                "vector count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                if vector.len() != self.vector_size {
                    return Err(RetrievalError::InvalidRequest(format!(
                        "embedding dimension {} != {}",
                        vector.len(),
                        self.vector_size
                    )));
                }
                Ok(json!({
                    "id": chunk.id,
                    "vector": vector,
                    "payload": {
                        "user_id": chunk.user_id,
                        "file_id": chunk.file_id,
                        "section_lc": chunk.section.to_lowercase(),
                        "chunk": chunk,
                    },
                }))
            })
            .collect::<Result<Vec<_>, RetrievalError>>()?;

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        if embedding.len() != self.vector_size {
            return Err(RetrievalError::InvalidRequest(format!(
                "query vector dim {} is not {}",
                embedding.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&json!({
                "vector": embedding,
                "limit": k,
                "with_payload": true,
                "filter": Self::filter_json(filter),
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in &hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let chunk = hit
                .pointer("/payload")
                .and_then(Self::chunk_from_payload)
                .ok_or_else(|| RetrievalError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: "point without chunk payload".to_string(),
                })?;
            if filter.matches(&chunk) {
                candidates.push(SearchCandidate::new(chunk, score, RetrievalSource::Vector));
            }
        }
        Ok(candidates)
    }

    async fn list(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError> {
        let mut chunks = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "filter": Self::filter_json(filter),
            });
            if let Some(offset) = &offset {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.collection_url("/points/scroll"))
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(RetrievalError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: Value = response.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                if let Some(chunk) = point.pointer("/payload").and_then(Self::chunk_from_payload)
                {
                    if filter.matches(&chunk) {
                        chunks.push(chunk);
                    }
                }
            }

            match parsed.pointer("/result/next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }
        Ok(chunks)
    }
}
