//! Monitor events produced by source collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Event severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// All tiers in matching precedence order (most urgent first)
    pub const PRECEDENCE: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Lowercase tier name used in config sections
    pub fn tier_name(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "critical" | "crit" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Next tier up, saturating at critical
    pub fn escalated(&self) -> Self {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of something a source observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    /// Name of the monitor that produced the event
    pub source: String,
    /// Advisory severity assigned by the source
    pub severity: Severity,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MonitorEvent {
    pub fn new(source: impl Into<String>, severity: Severity, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            severity,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the source flagged this line as progress output
    pub fn is_progress(&self) -> bool {
        self.metadata
            .get("is_progress")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
