//! Anthropic messages API

use super::{
    classify_message, classify_transport, embedded_error, http_client, read_body, AnalysisBackend,
    BackendError, MAX_TOKENS, SYSTEM_PROMPT, TEMPERATURE,
};
use std::time::Duration;
use telewatch_common::WatchError;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl AnthropicBackend {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key,
            model,
            client: http_client(timeout)?,
        })
    }
}

impl AnalysisBackend for AnthropicBackend {
    fn analyze(&self, prompt: &str) -> Result<String, BackendError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request_body)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let body = read_body(response)?;
        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::Generic(format!("Invalid JSON from anthropic: {}", e)))?;

        if let Some(message) = embedded_error(&json) {
            return Err(classify_message(&message));
        }

        let text: String = json
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(BackendError::Generic("anthropic returned no text".to_string()));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
