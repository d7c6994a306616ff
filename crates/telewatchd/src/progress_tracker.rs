//! Progress tracker - completion estimates for the watched job.
//!
//! Progress comes from configured completion indicators, then generic
//! percentage/fraction shapes in recent lines, then elapsed time against the
//! expected duration. Time-based estimates stay below 100.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::VecDeque;
use telewatch_common::config::{IndicatorKind, ProcessConfig, ProgressTrackingConfig};
use telewatch_common::truncate_chars;
use tracing::{debug, warn};

/// Recent lines kept for estimation and activity summaries
const MAX_RECENT_LOGS: usize = 100;

/// Snapshot history cap
const MAX_SNAPSHOTS: usize = 100;

/// Lines scanned per estimate, most recent first
const SCAN_LINES: usize = 20;

/// Ceiling for time-based estimates
const TIME_BASED_CAP: f64 = 99.9;

const ACTIVITY_LINE_CHARS: usize = 100;

static GENERIC_PATTERNS: Lazy<Vec<(Regex, IndicatorKind)>> = Lazy::new(|| {
    [
        (r"(\d+)%", IndicatorKind::Percentage),
        (r"(\d+)\s*/\s*(\d+)", IndicatorKind::Fraction),
        (r"progress:\s*(\d+)", IndicatorKind::Percentage),
        (r"completed:\s*(\d+)%", IndicatorKind::Percentage),
    ]
    .into_iter()
    .map(|(p, kind)| (Regex::new(p).expect("progress pattern"), kind))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EstimateSource {
    #[serde(rename = "log-based")]
    LogBased,
    #[serde(rename = "time-based")]
    TimeBased,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub percentage: f64,
    pub source: EstimateSource,
    /// Latest line at the time of the estimate
    pub log_snippet: String,
}

pub struct ProgressTracker {
    process_name: String,
    keywords: Vec<String>,
    expected_minutes: Option<f64>,
    indicators: Vec<(Regex, IndicatorKind)>,
    update_interval_percent: f64,
    min_update_interval: Duration,

    start_time: DateTime<Utc>,
    current_percentage: f64,
    last_reported_percentage: f64,
    last_update_time: DateTime<Utc>,
    snapshots: VecDeque<ProgressSnapshot>,
    recent_logs: VecDeque<String>,
    /// When the current percentage was first seen, and how often since
    plateau: Option<(DateTime<Utc>, usize)>,
}

impl ProgressTracker {
    pub fn new(process: &ProcessConfig, tracking: &ProgressTrackingConfig) -> Self {
        Self::starting_at(process, tracking, Utc::now())
    }

    pub fn starting_at(
        process: &ProcessConfig,
        tracking: &ProgressTrackingConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let indicators = process
            .completion_indicators
            .iter()
            .filter_map(|ind| match Regex::new(&ind.pattern) {
                Ok(re) => Some((re, ind.kind)),
                Err(e) => {
                    warn!("Skipping completion indicator '{}': {}", ind.pattern, e);
                    None
                }
            })
            .collect();

        Self {
            process_name: process.name.clone(),
            keywords: process.keywords.iter().map(|k| k.to_lowercase()).collect(),
            expected_minutes: process.expected_duration_minutes.filter(|m| *m > 0.0),
            indicators,
            update_interval_percent: if tracking.update_interval_percent > 0.0 {
                tracking.update_interval_percent
            } else {
                10.0
            },
            min_update_interval: saturating_seconds(tracking.min_update_interval_seconds),
            start_time: now,
            current_percentage: 0.0,
            last_reported_percentage: 0.0,
            last_update_time: now,
            snapshots: VecDeque::new(),
            recent_logs: VecDeque::new(),
            plateau: None,
        }
    }

    pub fn add_log_line(&mut self, line: &str) {
        if self.recent_logs.len() >= MAX_RECENT_LOGS {
            self.recent_logs.pop_front();
        }
        self.recent_logs.push_back(line.to_string());
    }

    pub fn estimate_progress(&mut self) -> Option<f64> {
        self.estimate_progress_at(Utc::now())
    }

    pub fn estimate_progress_at(&mut self, now: DateTime<Utc>) -> Option<f64> {
        if let Some(percent) = self.estimate_from_logs() {
            self.record_snapshot(percent, EstimateSource::LogBased, now);
            return Some(percent);
        }
        if let Some(percent) = self.estimate_from_time(now) {
            self.record_snapshot(percent, EstimateSource::TimeBased, now);
            return Some(percent);
        }
        None
    }

    fn estimate_from_logs(&self) -> Option<f64> {
        let recent = || self.recent_logs.iter().rev().take(SCAN_LINES);

        for (re, kind) in &self.indicators {
            for line in recent() {
                if let Some(caps) = re.captures(line) {
                    // A configured indicator is trusted even if out of range
                    if let Some(percent) = capture_percent(&caps, *kind) {
                        return Some(percent);
                    }
                }
            }
        }

        for line in recent() {
            let lower = line.to_lowercase();
            for (re, kind) in GENERIC_PATTERNS.iter() {
                let percent = re
                    .captures(&lower)
                    .and_then(|caps| capture_percent(&caps, *kind))
                    .filter(|p| (0.0..=100.0).contains(p));
                if percent.is_some() {
                    return percent;
                }
            }
        }
        None
    }

    fn estimate_from_time(&self, now: DateTime<Utc>) -> Option<f64> {
        let expected = self.expected_minutes?;
        let elapsed_minutes = (now - self.start_time).num_milliseconds() as f64 / 60_000.0;
        Some((elapsed_minutes / expected * 100.0).clamp(0.0, TIME_BASED_CAP))
    }

    fn record_snapshot(&mut self, percentage: f64, source: EstimateSource, now: DateTime<Utc>) {
        let unchanged = self
            .snapshots
            .back()
            .is_some_and(|last| last.percentage == percentage);
        self.plateau = match self.plateau {
            Some((since, seen)) if unchanged => Some((since, seen + 1)),
            _ => Some((now, 1)),
        };

        self.current_percentage = percentage;
        if self.snapshots.len() >= MAX_SNAPSHOTS {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(ProgressSnapshot {
            timestamp: now,
            percentage,
            source,
            log_snippet: self.recent_logs.back().cloned().unwrap_or_default(),
        });
        debug!(percentage, ?source, "Progress estimate");
    }

    /// A milestone bucket was crossed and the minimum interval has passed
    pub fn should_send_update(&self) -> bool {
        self.should_send_update_at(Utc::now())
    }

    pub fn should_send_update_at(&self, now: DateTime<Utc>) -> bool {
        let bucket = |p: f64| (p / self.update_interval_percent).floor() as i64;
        let milestone_crossed = bucket(self.current_percentage) > bucket(self.last_reported_percentage);
        let interval_met = now - self.last_update_time >= self.min_update_interval;
        milestone_crossed && interval_met
    }

    pub fn mark_update_sent(&mut self) {
        self.mark_update_sent_at(Utc::now());
    }

    pub fn mark_update_sent_at(&mut self, now: DateTime<Utc>) {
        self.last_reported_percentage = self.current_percentage;
        self.last_update_time = now;
    }

    /// The same percentage was seen at least twice and has not moved for
    /// longer than the threshold
    pub fn is_stalled(&self, threshold_minutes: u64) -> bool {
        self.is_stalled_at(threshold_minutes, Utc::now())
    }

    pub fn is_stalled_at(&self, threshold_minutes: u64, now: DateTime<Utc>) -> bool {
        match self.plateau {
            Some((since, seen)) if seen >= 2 => {
                now - since > saturating_minutes(threshold_minutes)
            }
            _ => false,
        }
    }

    /// "1h 5m" or "12m"
    pub fn elapsed_display(&self) -> String {
        self.elapsed_display_at(Utc::now())
    }

    pub fn elapsed_display_at(&self, now: DateTime<Utc>) -> String {
        format_duration(now - self.start_time)
    }

    /// Remaining time extrapolated from the current rate
    pub fn estimated_remaining(&self) -> Option<String> {
        self.estimated_remaining_at(Utc::now())
    }

    pub fn estimated_remaining_at(&self, now: DateTime<Utc>) -> Option<String> {
        if self.current_percentage <= 0.0 || self.current_percentage >= 100.0 {
            return None;
        }
        let elapsed = (now - self.start_time).num_seconds() as f64;
        let remaining = elapsed / self.current_percentage * 100.0 - elapsed;
        (remaining > 0.0).then(|| format_duration(saturating_seconds(remaining as u64)))
    }

    /// Recent lines mentioning a configured keyword, newest first
    pub fn recent_activity(&self, max_lines: usize) -> Vec<String> {
        if self.keywords.is_empty() {
            return Vec::new();
        }
        self.recent_logs
            .iter()
            .rev()
            .take(SCAN_LINES)
            .filter(|line| {
                let lower = line.to_lowercase();
                self.keywords.iter().any(|kw| lower.contains(kw.as_str()))
            })
            .take(max_lines)
            .map(|line| {
                let clean = line.trim();
                if clean.chars().count() > ACTIVITY_LINE_CHARS {
                    format!("{}...", truncate_chars(clean, ACTIVITY_LINE_CHARS - 3))
                } else {
                    clean.to_string()
                }
            })
            .collect()
    }

    pub fn current_percentage(&self) -> f64 {
        self.current_percentage
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &ProgressSnapshot> {
        self.snapshots.iter()
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }
}

fn capture_percent(caps: &Captures, kind: IndicatorKind) -> Option<f64> {
    let group = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    match kind {
        IndicatorKind::Percentage => group(1),
        IndicatorKind::Fraction => {
            let (current, total) = (group(1)?, group(2)?);
            (total > 0.0).then(|| current / total * 100.0)
        }
    }
}

/// Configured spans clamp to `Duration::MAX` instead of overflowing
fn saturating_seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn saturating_minutes(minutes: u64) -> Duration {
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .unwrap_or(Duration::MAX)
}

fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telewatch_common::config::CompletionIndicator;

    fn tracker(process: ProcessConfig) -> (ProgressTracker, DateTime<Utc>) {
        let t0 = Utc::now();
        let tracking = ProgressTrackingConfig::default();
        (ProgressTracker::starting_at(&process, &tracking, t0), t0)
    }

    #[test]
    fn test_no_signal_no_estimate() {
        let (mut t, t0) = tracker(ProcessConfig::default());
        t.add_log_line("warming up");
        assert_eq!(t.estimate_progress_at(t0), None);
        assert_eq!(t.snapshots().count(), 0);
    }

    #[test]
    fn test_generic_percentage_newest_first() {
        let (mut t, t0) = tracker(ProcessConfig::default());
        t.add_log_line("download 10%");
        t.add_log_line("download 40%");
        assert_eq!(t.estimate_progress_at(t0), Some(40.0));
    }

    #[test]
    fn test_generic_fraction() {
        let (mut t, t0) = tracker(ProcessConfig::default());
        t.add_log_line("processed 450 / 1000 records");
        assert_eq!(t.estimate_progress_at(t0), Some(45.0));
    }

    #[test]
    fn test_generic_out_of_range_ignored() {
        let (mut t, t0) = tracker(ProcessConfig::default());
        t.add_log_line("cpu at 250%");
        assert_eq!(t.estimate_progress_at(t0), None);
    }

    #[test]
    fn test_custom_indicator_wins() {
        let process = ProcessConfig {
            completion_indicators: vec![CompletionIndicator {
                pattern: r"epoch (\d+) of (\d+)".to_string(),
                kind: IndicatorKind::Fraction,
            }],
            ..Default::default()
        };
        let (mut t, t0) = tracker(process);
        t.add_log_line("epoch 3 of 4");
        t.add_log_line("loss 12% lower");
        assert_eq!(t.estimate_progress_at(t0), Some(75.0));
    }

    #[test]
    fn test_time_based_capped() {
        let process = ProcessConfig {
            expected_duration_minutes: Some(10.0),
            ..Default::default()
        };
        let (mut t, t0) = tracker(process);
        let half = t.estimate_progress_at(t0 + Duration::minutes(5)).unwrap();
        assert!((half - 50.0).abs() < 1e-9);
        let late = t.estimate_progress_at(t0 + Duration::minutes(30)).unwrap();
        assert_eq!(late, TIME_BASED_CAP);
        assert_eq!(t.snapshots().last().map(|s| s.source), Some(EstimateSource::TimeBased));
    }

    #[test]
    fn test_elapsed_and_remaining() {
        let (mut t, t0) = tracker(ProcessConfig::default());
        assert_eq!(t.elapsed_display_at(t0 + Duration::minutes(12)), "12m");
        assert_eq!(t.elapsed_display_at(t0 + Duration::minutes(65)), "1h 5m");

        t.add_log_line("25% done");
        t.estimate_progress_at(t0 + Duration::minutes(10));
        assert_eq!(
            t.estimated_remaining_at(t0 + Duration::minutes(10)).as_deref(),
            Some("30m")
        );
    }

    #[test]
    fn test_recent_activity() {
        let process = ProcessConfig {
            keywords: vec!["Epoch".to_string()],
            ..Default::default()
        };
        let (mut t, _) = tracker(process);
        t.add_log_line("epoch 1 finished");
        t.add_log_line("unrelated");
        t.add_log_line(&format!("EPOCH 2 {}", "x".repeat(200)));

        let activity = t.recent_activity(5);
        assert_eq!(activity.len(), 2);
        assert!(activity[0].starts_with("EPOCH 2"));
        assert_eq!(activity[0].chars().count(), 100);
        assert!(activity[0].ends_with("..."));
        assert_eq!(activity[1], "epoch 1 finished");
    }
}
