use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::RetrievalError;
use crate::traits::LlmProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completions language model endpoint (OpenAI wire shape), used
/// for hypothetical-answer expansion only.
pub struct HttpLlmProvider {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmProvider {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, prompt: &str) -> Result<String, RetrievalError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": 256,
            "temperature": 0.0,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "llm".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| RetrievalError::BackendResponse {
                backend: "llm".to_string(),
                details: "completion without message content".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(HttpLlmProvider::new("not-a-url", "gpt-4o-mini", None).is_err());
    }
}
