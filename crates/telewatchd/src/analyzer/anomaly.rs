//! Anomaly Detector - frequency spikes, stream stalls and structural novelty.

use super::signature::structural_fingerprint;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use telewatch_common::config::AnomalyConfig;
use telewatch_common::Severity;
use tracing::warn;

/// Samples the window must hold before the first reading becomes the baseline
const BASELINE_MIN_SAMPLES: usize = 10;

/// Weight kept by the baseline on every update
const BASELINE_RETAIN: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Spike,
    Stall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
}

/// Outcome of recording one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub is_novel: bool,
    /// Lines per minute over the window
    pub frequency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyStats {
    pub frequency: f64,
    pub baseline: f64,
    pub known_structures: usize,
}

pub struct AnomalyDetector {
    window: Duration,
    spike_threshold: f64,
    stall_after: Duration,
    novelty_capacity: usize,
    timestamps: VecDeque<Instant>,
    baseline: Option<f64>,
    last_frequency: f64,
    last_event: Instant,
    stalled: bool,
    known_fingerprints: HashSet<String>,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_seconds.max(1)),
            spike_threshold: config.spike_threshold,
            stall_after: Duration::try_from_secs_f64(config.stall_seconds.max(0.0))
                .unwrap_or(Duration::MAX),
            novelty_capacity: config.novelty_capacity.max(1),
            timestamps: VecDeque::new(),
            baseline: None,
            last_frequency: 0.0,
            last_event: Instant::now(),
            stalled: false,
            known_fingerprints: HashSet::new(),
        }
    }

    pub fn add_event(&mut self, line: &str) -> AnomalyReport {
        self.add_event_at(line, Instant::now())
    }

    pub fn add_event_at(&mut self, line: &str, now: Instant) -> AnomalyReport {
        self.last_event = now;
        self.stalled = false;

        self.timestamps.push_back(now);
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        let frequency = self.timestamps.len() as f64 / (self.window.as_secs_f64() / 60.0);
        self.last_frequency = frequency;

        let mut anomalies = Vec::new();
        match self.baseline {
            None => {
                if self.timestamps.len() > BASELINE_MIN_SAMPLES {
                    self.baseline = Some(frequency);
                }
            }
            Some(baseline) => {
                if frequency > baseline * self.spike_threshold {
                    let message = format!(
                        "Log frequency spike detected: {:.1} L/min (Baseline: {:.1})",
                        frequency, baseline
                    );
                    warn!("{}", message);
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::Spike,
                        severity: Severity::Warning,
                        message,
                    });
                }
                self.baseline =
                    Some(baseline * BASELINE_RETAIN + frequency * (1.0 - BASELINE_RETAIN));
            }
        }

        let is_novel = self.remember(structural_fingerprint(line));

        AnomalyReport {
            anomalies,
            is_novel,
            frequency,
        }
    }

    /// Emit a stall once per silent episode
    pub fn check_stall(&mut self) -> Option<Anomaly> {
        self.check_stall_at(Instant::now())
    }

    pub fn check_stall_at(&mut self, now: Instant) -> Option<Anomaly> {
        if self.stalled {
            return None;
        }
        if now.saturating_duration_since(self.last_event) <= self.stall_after {
            return None;
        }

        self.stalled = true;
        let message = format!(
            "Log stream stall detected! No logs for {} seconds.",
            self.stall_after.as_secs_f64()
        );
        warn!("{}", message);
        Some(Anomaly {
            kind: AnomalyKind::Stall,
            severity: Severity::Critical,
            message,
        })
    }

    /// Override the frequency baseline
    pub fn set_baseline(&mut self, baseline: Option<f64>) {
        self.baseline = baseline;
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn stats(&self) -> AnomalyStats {
        AnomalyStats {
            frequency: self.last_frequency,
            baseline: self.baseline.unwrap_or(0.0),
            known_structures: self.known_fingerprints.len(),
        }
    }

    /// Returns true if the fingerprint was new
    fn remember(&mut self, fingerprint: String) -> bool {
        if !self.known_fingerprints.insert(fingerprint) {
            return false;
        }
        if self.known_fingerprints.len() > self.novelty_capacity {
            // Any member will do
            if let Some(victim) = self.known_fingerprints.iter().next().cloned() {
                self.known_fingerprints.remove(&victim);
            }
        }
        true
    }
}
