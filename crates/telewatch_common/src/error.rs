//! Error types for Telewatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),

    #[error("Unknown analysis provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WatchError {
    pub fn invalid_pattern(pattern: &str, err: impl std::fmt::Display) -> Self {
        WatchError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        }
    }

    /// Short machine-readable code for status output
    pub fn code(&self) -> &'static str {
        match self {
            WatchError::Config(_) => "config",
            WatchError::MissingEnvVar(_) => "missing_env",
            WatchError::UnknownProvider(_) => "unknown_provider",
            WatchError::InvalidPattern { .. } => "invalid_pattern",
            WatchError::Io(_) => "io",
            WatchError::Toml(_) => "toml",
            WatchError::Json(_) => "json",
        }
    }
}
