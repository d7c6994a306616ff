//! Notification seam - where analyses leave the engine
//!
//! A notifier may refuse delivery (filters, rate limits); the monitor loop
//! treats a refusal as non-fatal.

use telewatch_common::{Analysis, Severity};
use tracing::{error, info, warn};

/// Notification urgency level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationUrgency {
    Low,
    Normal,
    Critical,
}

impl From<Severity> for NotificationUrgency {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => NotificationUrgency::Low,
            Severity::Warning => NotificationUrgency::Normal,
            Severity::Critical => NotificationUrgency::Critical,
        }
    }
}

pub trait Notifier: Send {
    /// Deliver one analysis. False means refused or not delivered.
    fn send(&mut self, analysis: &Analysis) -> bool;
}

/// Writes analyses to the tracing log
pub struct LogNotifier {
    min_severity: Severity,
    sent: u64,
}

impl LogNotifier {
    pub fn new(min_severity: Severity) -> Self {
        Self {
            min_severity,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

impl Notifier for LogNotifier {
    fn send(&mut self, analysis: &Analysis) -> bool {
        if analysis.severity < self.min_severity {
            return false;
        }

        let source = analysis.source();
        match NotificationUrgency::from(analysis.severity) {
            NotificationUrgency::Low => info!(
                source,
                "{} | cause: {} | action: {}",
                analysis.summary,
                analysis.root_cause,
                analysis.suggested_action
            ),
            NotificationUrgency::Normal => warn!(
                source,
                "{} | cause: {} | action: {}",
                analysis.summary,
                analysis.root_cause,
                analysis.suggested_action
            ),
            NotificationUrgency::Critical => error!(
                source,
                "{} | cause: {} | action: {}",
                analysis.summary,
                analysis.root_cause,
                analysis.suggested_action
            ),
        }
        self.sent += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use telewatch_common::MonitorEvent;

    fn analysis(severity: Severity) -> Analysis {
        let event = Arc::new(MonitorEvent::new("svc", severity, "x"));
        Analysis::new(severity, "s", "r", "a", event)
    }

    #[test]
    fn test_urgency_mapping() {
        assert_eq!(NotificationUrgency::from(Severity::Info), NotificationUrgency::Low);
        assert_eq!(
            NotificationUrgency::from(Severity::Critical),
            NotificationUrgency::Critical
        );
    }

    #[test]
    fn test_min_severity_refuses() {
        let mut notifier = LogNotifier::new(Severity::Warning);
        assert!(!notifier.send(&analysis(Severity::Info)));
        assert!(notifier.send(&analysis(Severity::Warning)));
        assert!(notifier.send(&analysis(Severity::Critical)));
        assert_eq!(notifier.sent(), 2);
    }
}
