//! External analysis backends
//!
//! The engine only needs "submit text, receive text" with four failure
//! categories. Each provider adapter maps transport errors and HTTP status
//! codes to a category itself; `classify_message` covers free-text errors
//! that arrive inside a response body.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use reqwest::StatusCode;
use std::time::Duration;
use telewatch_common::config::LlmConfig;
use telewatch_common::WatchError;

/// System prompt shared by every chat-style provider
pub const SYSTEM_PROMPT: &str = "You are a log analysis expert helping monitor system processes.";

/// Upper bound on generated tokens
pub const MAX_TOKENS: u32 = 500;

pub const TEMPERATURE: f64 = 0.3;

/// Categorized capability failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Analysis backend error: {0}")]
    Generic(String),
}

impl BackendError {
    pub fn category(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => "connection",
            BackendError::QuotaExhausted(_) => "quota",
            BackendError::Auth(_) => "auth",
            BackendError::Generic(_) => "generic",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BackendError::Connection(m)
            | BackendError::QuotaExhausted(m)
            | BackendError::Auth(m)
            | BackendError::Generic(m) => m,
        }
    }
}

/// Submit a prompt, receive text
pub trait AnalysisBackend: Send {
    fn analyze(&self, prompt: &str) -> Result<String, BackendError>;

    /// Provider name for logs
    fn name(&self) -> &str;

    /// Cheap reachability probe
    fn is_available(&self) -> bool {
        true
    }
}

/// Map an HTTP status to a category. `None` for success.
pub fn classify_status(status: StatusCode, body: &str) -> Option<BackendError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("HTTP {}: {}", status.as_u16(), snippet(body));
    Some(match status.as_u16() {
        401 | 403 => BackendError::Auth(detail),
        402 | 429 => BackendError::QuotaExhausted(detail),
        _ => classify_message(&detail),
    })
}

/// Map a transport failure to a category
pub fn classify_transport(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() {
        BackendError::Connection(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status, "").unwrap_or_else(|| BackendError::Generic(err.to_string()))
    } else {
        classify_message(&err.to_string())
    }
}

/// Keyword classification for provider errors that only exist as text
pub fn classify_message(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has(&["connection", "timeout", "timed out", "unreachable", "refused"]) {
        BackendError::Connection(message.to_string())
    } else if has(&["quota", "rate limit", "rate_limit", "billing", "insufficient"]) {
        BackendError::QuotaExhausted(message.to_string())
    } else if has(&["invalid api key", "invalid_api_key", "auth", "401", "unauthorized"]) {
        BackendError::Auth(message.to_string())
    } else {
        BackendError::Generic(message.to_string())
    }
}

/// Provider default model
pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("gpt-4o-mini"),
        "anthropic" => Some("claude-3-5-haiku-20241022"),
        "groq" => Some("llama-3.3-70b-versatile"),
        "ollama" => Some("llama3.2"),
        _ => None,
    }
}

/// Build the backend selected by configuration
pub fn create_backend(config: &LlmConfig) -> Result<Box<dyn AnalysisBackend>, WatchError> {
    let provider = config.provider.trim().to_lowercase();
    let model = match (&config.model, default_model(&provider)) {
        (Some(model), _) => model.clone(),
        (None, Some(model)) => model.to_string(),
        (None, None) => return Err(WatchError::UnknownProvider(config.provider.clone())),
    };
    let timeout = Duration::from_secs(config.timeout_secs);

    let require_key = || {
        config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WatchError::Config(format!("{} requires llm.api_key", provider)))
    };

    let backend: Box<dyn AnalysisBackend> = match provider.as_str() {
        "openai" => Box::new(OpenAiBackend::new(
            "openai",
            config.base_url.as_deref().unwrap_or(openai::OPENAI_BASE_URL),
            require_key()?,
            model,
            timeout,
        )?),
        "groq" => Box::new(OpenAiBackend::new(
            "groq",
            config.base_url.as_deref().unwrap_or(openai::GROQ_BASE_URL),
            require_key()?,
            model,
            timeout,
        )?),
        "anthropic" => Box::new(AnthropicBackend::new(
            config.base_url.as_deref().unwrap_or(anthropic::ANTHROPIC_BASE_URL),
            require_key()?,
            model,
            timeout,
        )?),
        "ollama" => Box::new(OllamaBackend::new(
            config.base_url.as_deref().unwrap_or(ollama::OLLAMA_BASE_URL),
            model,
            timeout,
        )?),
        _ => return Err(WatchError::UnknownProvider(config.provider.clone())),
    };
    Ok(backend)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, WatchError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| WatchError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Read a response body, classifying non-success statuses
pub(crate) fn read_body(response: reqwest::blocking::Response) -> Result<String, BackendError> {
    let status = response.status();
    let body = response.text().map_err(|e| classify_transport(&e))?;
    match classify_status(status, &body) {
        Some(err) => Err(err),
        None => Ok(body),
    }
}

/// Error text some providers embed in a JSON body under `error`
pub(crate) fn embedded_error(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

fn snippet(body: &str) -> String {
    telewatch_common::truncate_chars(body.trim(), 200)
}
