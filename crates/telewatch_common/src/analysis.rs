//! The engine's decision about a single event.

use crate::event::{MonitorEvent, Severity};
use std::sync::Arc;

/// Maximum summary length in characters
pub const SUMMARY_LIMIT: usize = 200;

/// Maximum root cause length in characters
pub const ROOT_CAUSE_LIMIT: usize = 300;

/// Maximum suggested action length in characters
pub const ACTION_LIMIT: usize = 300;

/// Analysis of one event. Shares the originating event rather than owning it.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub severity: Severity,
    pub summary: String,
    pub root_cause: String,
    pub suggested_action: String,
    pub event: Arc<MonitorEvent>,
}

impl Analysis {
    pub fn new(
        severity: Severity,
        summary: &str,
        root_cause: &str,
        suggested_action: &str,
        event: Arc<MonitorEvent>,
    ) -> Self {
        Self {
            severity,
            summary: truncate_chars(summary, SUMMARY_LIMIT),
            root_cause: truncate_chars(root_cause, ROOT_CAUSE_LIMIT),
            suggested_action: truncate_chars(suggested_action, ACTION_LIMIT),
            event,
        }
    }

    pub fn source(&self) -> &str {
        &self.event.source
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_truncated() {
        let event = Arc::new(MonitorEvent::new("svc", Severity::Info, "x"));
        let long = "a".repeat(500);
        let analysis = Analysis::new(Severity::Warning, &long, &long, &long, event);
        assert_eq!(analysis.summary.chars().count(), SUMMARY_LIMIT);
        assert_eq!(analysis.root_cause.chars().count(), ROOT_CAUSE_LIMIT);
        assert_eq!(analysis.suggested_action.chars().count(), ACTION_LIMIT);
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_event_shared_not_copied() {
        let event = Arc::new(MonitorEvent::new("svc", Severity::Info, "x"));
        let analysis = Analysis::new(Severity::Info, "s", "r", "a", Arc::clone(&event));
        assert!(Arc::ptr_eq(&analysis.event, &event));
        assert_eq!(analysis.source(), "svc");
    }
}
