//! Monitor loop - the single consumer that owns all engine state
//!
//! Each tick drains every source in order and runs the analysis pipeline
//! synchronously per event. Stall and progress checks run on the same thread
//! at a coarser, elapsed-time-gated cadence.

use crate::analyzer::EventAnalyzer;
use crate::notifier::Notifier;
use crate::progress_tracker::ProgressTracker;
use crate::sources::EventSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telewatch_common::{Analysis, Config, MonitorEvent, Severity};
use tracing::{debug, info};

/// Lines of recent activity attached to a milestone notification
const ACTIVITY_LINES: usize = 3;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub events: usize,
    pub delivered: usize,
    pub refused: usize,
    pub checks_ran: bool,
}

pub struct MonitorLoop {
    analyzer: EventAnalyzer,
    progress: Option<ProgressTracker>,
    stall_threshold_minutes: u64,
    progress_stall_reported: bool,
    sources: Vec<Box<dyn EventSource>>,
    notifier: Box<dyn Notifier>,
    poll_interval: Duration,
    check_interval: Duration,
    last_check: Option<Instant>,
    process_name: String,
}

impl MonitorLoop {
    pub fn new(analyzer: EventAnalyzer, notifier: Box<dyn Notifier>, config: &Config) -> Self {
        let progress = config
            .progress_tracking
            .enabled
            .then(|| ProgressTracker::new(&config.process, &config.progress_tracking));

        Self {
            analyzer,
            progress,
            stall_threshold_minutes: config.progress_tracking.stall_threshold_minutes,
            progress_stall_reported: false,
            sources: Vec::new(),
            notifier,
            poll_interval: Duration::from_millis(config.monitor.poll_interval_ms.max(1)),
            check_interval: Duration::from_millis(config.monitor.check_interval_ms),
            last_check: None,
            process_name: config.process.name.clone(),
        }
    }

    pub fn add_source(&mut self, source: Box<dyn EventSource>) {
        info!(source = source.name(), "Source attached");
        self.sources.push(source);
    }

    pub fn tick(&mut self, now: Instant) -> TickSummary {
        let mut summary = TickSummary::default();

        let batches: Vec<Vec<MonitorEvent>> =
            self.sources.iter_mut().map(|s| s.get_events()).collect();
        for event in batches.into_iter().flatten() {
            summary.events += 1;
            if let Some(tracker) = self.progress.as_mut() {
                tracker.add_log_line(&event.content);
            }
            let analysis = self.analyzer.analyze_event(event);
            self.deliver(&analysis, &mut summary);
            for alert in self.analyzer.take_anomaly_alerts() {
                self.deliver(&alert, &mut summary);
            }
        }

        let due = self
            .last_check
            .map_or(true, |last| now.saturating_duration_since(last) >= self.check_interval);
        if due {
            self.last_check = Some(now);
            self.run_checks(&mut summary);
            summary.checks_ran = true;
        }
        summary
    }

    /// Tick on the poll cadence until shutdown or every source has closed
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            sources = self.sources.len(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Monitor loop started"
        );
        while !shutdown.load(Ordering::Relaxed) {
            self.tick(Instant::now());
            if !self.sources.is_empty() && self.sources.iter().all(|s| !s.is_running()) {
                // Pick up anything queued right before the close
                self.tick(Instant::now());
                info!("All sources closed");
                break;
            }
            std::thread::sleep(self.poll_interval);
        }
        info!("{}", self.analyzer.usage_summary(crate::analyzer::Period::Current));
    }

    fn run_checks(&mut self, summary: &mut TickSummary) {
        if let Some(stall) = self.analyzer.check_stall() {
            self.deliver(&stall, summary);
        }

        if let Some(cache) = self.analyzer.cache_mut() {
            let evicted = cache.evict_expired();
            if evicted > 0 {
                debug!(evicted, "Expired cache slots evicted");
            }
        }

        let Some(tracker) = self.progress.as_mut() else {
            return;
        };

        let mut outgoing = Vec::new();
        if let Some(percent) = tracker.estimate_progress() {
            if tracker.should_send_update() {
                outgoing.push(milestone_analysis(&self.process_name, percent, tracker));
                tracker.mark_update_sent();
            }
        }

        if tracker.is_stalled(self.stall_threshold_minutes) {
            if !self.progress_stall_reported {
                self.progress_stall_reported = true;
                outgoing.push(progress_stall_analysis(
                    &self.process_name,
                    tracker.current_percentage(),
                    self.stall_threshold_minutes,
                ));
            }
        } else {
            self.progress_stall_reported = false;
        }

        for analysis in outgoing {
            self.deliver(&analysis, summary);
        }
    }

    fn deliver(&mut self, analysis: &Analysis, summary: &mut TickSummary) {
        if self.notifier.send(analysis) {
            summary.delivered += 1;
        } else {
            summary.refused += 1;
            debug!(summary = %analysis.summary, "Notifier refused analysis");
        }
    }

    pub fn analyzer(&self) -> &EventAnalyzer {
        &self.analyzer
    }

    pub fn progress(&self) -> Option<&ProgressTracker> {
        self.progress.as_ref()
    }
}

fn milestone_analysis(process: &str, percent: f64, tracker: &ProgressTracker) -> Analysis {
    let mut summary = format!(
        "{}: {:.1}% complete (elapsed {})",
        process,
        percent,
        tracker.elapsed_display()
    );
    if let Some(remaining) = tracker.estimated_remaining() {
        summary.push_str(&format!(", about {} left", remaining));
    }

    let activity = tracker.recent_activity(ACTIVITY_LINES);
    let action = if activity.is_empty() {
        "No action needed".to_string()
    } else {
        format!("Recent: {}", activity.join(" / "))
    };

    let event = MonitorEvent::new(process, Severity::Info, summary.clone())
        .with_metadata("is_progress", serde_json::json!(true));
    Analysis::new(
        Severity::Info,
        &summary,
        "Progress milestone reached",
        &action,
        Arc::new(event),
    )
}

fn progress_stall_analysis(process: &str, percent: f64, threshold_minutes: u64) -> Analysis {
    let summary = format!("{}: progress stalled at {:.1}%", process, percent);
    let event = MonitorEvent::new(process, Severity::Warning, summary.clone())
        .with_metadata("is_progress", serde_json::json!(true));
    Analysis::new(
        Severity::Warning,
        &summary,
        &format!("No progress for over {} minutes", threshold_minutes),
        "Check whether the job is stuck or waiting on a resource",
        Arc::new(event),
    )
}
