use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::RetrievalError;
use crate::traits::ScoringModel;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cross-encoder service speaking `POST /score {"pairs": [[q, p], ...]}`
/// and answering `{"scores": [...]}`, one score per pair.
pub struct HttpScoringModel {
    client: Client,
    endpoint: Url,
}

impl HttpScoringModel {
    pub fn new(endpoint: &str) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: Url::parse(endpoint)?,
        })
    }
}

#[async_trait]
impl ScoringModel for HttpScoringModel {
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RetrievalError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let pairs_json: Vec<Value> = pairs
            .iter()
            .map(|(query, passage)| json!([query, passage]))
            .collect();
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "pairs": pairs_json }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "scorer".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let scores: Vec<f32> = parsed
            .pointer("/scores")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        if scores.len() != pairs.len() {
            return Err(RetrievalError::BackendResponse {
                backend: "scorer".to_string(),
                details: format!("{} scores for {} pairs", scores.len(), pairs.len()),
            });
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(HttpScoringModel::new("no scheme").is_err());
    }
}
