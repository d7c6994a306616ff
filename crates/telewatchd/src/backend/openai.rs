//! OpenAI-compatible chat completions (OpenAI, Groq)

use super::{
    classify_message, classify_transport, embedded_error, http_client, read_body, AnalysisBackend,
    BackendError, MAX_TOKENS, SYSTEM_PROMPT, TEMPERATURE,
};
use std::time::Duration;
use telewatch_common::WatchError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai";

pub struct OpenAiBackend {
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiBackend {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            name: name.to_string(),
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            client: http_client(timeout)?,
        })
    }
}

impl AnalysisBackend for OpenAiBackend {
    fn analyze(&self, prompt: &str) -> Result<String, BackendError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let body = read_body(response)?;
        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::Generic(format!("Invalid JSON from {}: {}", self.name, e)))?;

        if let Some(message) = embedded_error(&json) {
            return Err(classify_message(&message));
        }

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Generic(format!("{} returned no choices", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
