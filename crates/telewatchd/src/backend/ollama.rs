//! Local Ollama chat backend

use super::{
    classify_message, classify_transport, embedded_error, http_client, read_body, AnalysisBackend,
    BackendError, SYSTEM_PROMPT, TEMPERATURE,
};
use std::time::Duration;
use telewatch_common::WatchError;

pub const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

/// Timeout for the reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OllamaBackend {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self, WatchError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: http_client(timeout)?,
        })
    }

    /// Whether the Ollama API answers at all
    pub fn is_running(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl AnalysisBackend for OllamaBackend {
    fn analyze(&self, prompt: &str) -> Result<String, BackendError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "stream": false,
            "options": {"temperature": TEMPERATURE},
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request_body)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let body = read_body(response)?;
        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::Generic(format!("Invalid JSON from ollama: {}", e)))?;

        if let Some(message) = embedded_error(&json) {
            return Err(classify_message(&message));
        }

        json.pointer("/message/content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Generic("ollama returned an empty response".to_string()))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn is_available(&self) -> bool {
        self.is_running()
    }
}
