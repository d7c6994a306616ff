//! Configuration management for telewatchd.
//!
//! Loads settings from a TOML file (explicit path, user config dir, /etc,
//! working directory) or falls back to defaults. `${VAR}` and `$VAR`
//! references inside string values are substituted from the environment
//! after parsing, so comments and keys are left alone.

use crate::error::WatchError;
use crate::event::Severity;
use crate::{APP_NAME, SYSTEM_CONFIG_PATH};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("env var pattern")
});

/// External analysis provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// openai, anthropic, groq or ollama
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Provider default when unset
    #[serde(default)]
    pub model: Option<String>,

    /// Custom endpoint (Ollama or self-hosted gateways)
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: None,
            base_url: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Knobs that keep external analysis calls rare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Lines of event content kept in a prompt
    #[serde(default = "default_max_context_lines")]
    pub max_context_lines: usize,

    #[serde(default)]
    pub include_timestamps: bool,

    #[serde(default = "default_true")]
    pub use_local_patterns: bool,

    #[serde(default = "default_true")]
    pub skip_llm_for_info: bool,

    /// Samples collected before the profiler commits to a format
    #[serde(default = "default_profiler_limit")]
    pub profiler_limit: usize,

    /// Prior events included in a prompt
    #[serde(default = "default_context_size")]
    pub context_size: usize,

    /// Recent-event ring capacity
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Skip profiling and anomaly detection entirely
    #[serde(default)]
    pub turbo: bool,
}

fn default_true() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_max_context_lines() -> usize {
    15
}

fn default_profiler_limit() -> usize {
    50
}

fn default_context_size() -> usize {
    5
}

fn default_history_limit() -> usize {
    50
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_seconds: default_cache_ttl(),
            max_context_lines: default_max_context_lines(),
            include_timestamps: false,
            use_local_patterns: true,
            skip_llm_for_info: true,
            profiler_limit: default_profiler_limit(),
            context_size: default_context_size(),
            history_limit: default_history_limit(),
            turbo: false,
        }
    }
}

/// Static severity patterns per tier. Empty means built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityPatterns {
    #[serde(default)]
    pub critical: Vec<String>,
    #[serde(default)]
    pub warning: Vec<String>,
    #[serde(default)]
    pub info: Vec<String>,
}

impl SeverityPatterns {
    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.warning.is_empty() && self.info.is_empty()
    }

    pub fn for_tier(&self, tier: Severity) -> &[String] {
        match tier {
            Severity::Critical => &self.critical,
            Severity::Warning => &self.warning,
            Severity::Info => &self.info,
        }
    }
}

/// Anomaly detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Sliding window for frequency measurement
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Multiplier over baseline that counts as a spike
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,

    /// Silence that counts as a stalled stream
    #[serde(default = "default_stall_seconds")]
    pub stall_seconds: f64,

    /// Remembered structural fingerprints
    #[serde(default = "default_novelty_capacity")]
    pub novelty_capacity: usize,
}

fn default_window_seconds() -> u64 {
    60
}

fn default_spike_threshold() -> f64 {
    3.0
}

fn default_stall_seconds() -> f64 {
    300.0
}

fn default_novelty_capacity() -> usize {
    1000
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            spike_threshold: default_spike_threshold(),
            stall_seconds: default_stall_seconds(),
            novelty_capacity: default_novelty_capacity(),
        }
    }
}

/// How a completion indicator expresses progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    /// First capture group is a percentage
    Percentage,
    /// Capture groups are `current` and `total`
    Fraction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionIndicator {
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
}

/// Description of the long-running job being watched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_process_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub expected_duration_minutes: Option<f64>,

    #[serde(default)]
    pub completion_indicators: Vec<CompletionIndicator>,
}

fn default_process_name() -> String {
    "Process".to_string()
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: default_process_name(),
            description: String::new(),
            keywords: Vec::new(),
            expected_duration_minutes: None,
            completion_indicators: Vec::new(),
        }
    }
}

/// Progress milestone reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressTrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_update_interval_percent")]
    pub update_interval_percent: f64,

    #[serde(default = "default_min_update_interval")]
    pub min_update_interval_seconds: u64,

    #[serde(default = "default_stall_threshold_minutes")]
    pub stall_threshold_minutes: u64,
}

fn default_update_interval_percent() -> f64 {
    10.0
}

fn default_min_update_interval() -> u64 {
    300
}

fn default_stall_threshold_minutes() -> u64 {
    30
}

impl Default for ProgressTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_percent: default_update_interval_percent(),
            min_update_interval_seconds: default_min_update_interval(),
            stall_threshold_minutes: default_stall_threshold_minutes(),
        }
    }
}

/// Consumer loop cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Stall and progress checks
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_check_interval() -> u64 {
    2_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            check_interval_ms: default_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub optimization: OptimizationConfig,

    #[serde(default)]
    pub severity_patterns: SeverityPatterns,

    #[serde(default)]
    pub anomaly_detection: AnomalyConfig,

    #[serde(default)]
    pub process: ProcessConfig,

    #[serde(default)]
    pub progress_tracking: ProgressTrackingConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from an explicit path, or the first config found on the search path.
    /// Only a missing file on the search path falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, WatchError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        warn!("Config not found, using defaults");
        Ok(Config::default())
    }

    /// Candidate config locations, highest priority first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(APP_NAME).join("config.toml"));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
        paths.push(PathBuf::from("config.toml"));
        paths
    }

    pub fn load_from_path(path: &Path) -> Result<Self, WatchError> {
        let raw = fs::read_to_string(path)?;
        let config = Self::parse(&raw)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text, then substitute environment references in string values
    pub fn parse(raw: &str) -> Result<Self, WatchError> {
        let mut value: toml::Value = toml::from_str(raw)?;
        substitute_in_value(&mut value)?;
        Ok(value.try_into()?)
    }
}

fn substitute_in_value(value: &mut toml::Value) -> Result<(), WatchError> {
    match value {
        toml::Value::String(s) => *s = substitute_env_vars(s)?,
        toml::Value::Array(items) => {
            for item in items.iter_mut() {
                substitute_in_value(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_in_value(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace `${VAR}` / `$VAR` with environment values. Unset variables are an error.
pub fn substitute_env_vars(raw: &str) -> Result<String, WatchError> {
    let mut missing: Option<String> = None;
    let replaced = ENV_VAR_RE.replace_all(raw, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(WatchError::MissingEnvVar(name)),
        None => Ok(replaced.into_owned()),
    }
}
