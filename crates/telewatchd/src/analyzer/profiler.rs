//! Log Structure Profiler - learns a stream's shape and re-learns on drift
//!
//! LEARNING collects raw lines until `sample_limit`, then the profile is
//! computed. PROFILED checks each new line for conformance with a leaky drift
//! counter; sustained mismatch resets the profiler to LEARNING.

use super::context::strip_timestamp;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Lines probed when deciding whether a stream is JSON
const JSON_PROBE_LINES: usize = 10;

/// Candidate field delimiters, in tie-break order
const DELIMITERS: &[&str] = &[",", "|", "\t", " - ", " : "];

/// Share of samples that must contain the delimiter
const DELIMITER_RATIO: f64 = 0.8;

/// Share of samples that must carry the timestamp shape
const TIMESTAMP_RATIO: f64 = 0.7;

/// Share of samples a word must appear in to count as a common fragment
const FRAGMENT_RATIO: f64 = 0.5;

/// Drift trips once the counter exceeds this share of `sample_limit`
const DRIFT_RATIO: f64 = 0.2;

/// Decay applied to the drift counter on every conforming line
const DRIFT_DECAY: f64 = 0.1;

/// iso8601, syslog, bracketed
static TIMESTAMP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}",
        r"[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}",
        r"\[\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("timestamp pattern"))
    .collect()
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z]{4,}\b").expect("word pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfilerState {
    Learning,
    Profiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Json,
    Structured,
    Unstructured,
    Unknown,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Json => "json",
            FormatType::Structured => "structured",
            FormatType::Unstructured => "unstructured",
            FormatType::Unknown => "unknown",
        }
    }
}

/// Discovered structure of a log stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogProfile {
    pub format_type: FormatType,
    pub delimiter: Option<String>,
    pub has_timestamp: bool,
    pub timestamp_pattern: Option<String>,
    /// Words present in most samples; noise baseline
    pub common_fragments: Vec<String>,
    /// Leaky drift counter
    pub drift_score: f64,
}

impl Default for LogProfile {
    fn default() -> Self {
        Self {
            format_type: FormatType::Unknown,
            delimiter: None,
            has_timestamp: false,
            timestamp_pattern: None,
            common_fragments: Vec::new(),
            drift_score: 0.0,
        }
    }
}

pub struct LogProfiler {
    sample_limit: usize,
    samples: Vec<String>,
    state: ProfilerState,
    profile: LogProfile,
    timestamp_re: Option<Regex>,
}

impl LogProfiler {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit: sample_limit.max(1),
            samples: Vec::new(),
            state: ProfilerState::Learning,
            profile: LogProfile::default(),
            timestamp_re: None,
        }
    }

    /// Feed one raw line. Returns true when the line tripped drift.
    pub fn add_sample(&mut self, line: &str) -> bool {
        match self.state {
            ProfilerState::Learning => {
                if self.samples.len() < self.sample_limit {
                    self.samples.push(line.trim().to_string());
                }
                if self.samples.len() >= self.sample_limit {
                    self.profile_stream();
                }
                false
            }
            ProfilerState::Profiled => {
                if !self.check_drift(line) {
                    return false;
                }
                warn!(
                    format = self.profile.format_type.as_str(),
                    drift = self.profile.drift_score,
                    "Structural drift detected, re-profiling"
                );
                self.reset();
                self.samples.push(line.trim().to_string());
                true
            }
        }
    }

    /// Compute a profile from the samples collected so far
    pub fn profile_stream(&mut self) -> &LogProfile {
        if self.samples.is_empty() {
            return &self.profile;
        }

        let mut profile = LogProfile::default();
        if self.looks_like_json() {
            profile.format_type = FormatType::Json;
        } else if let Some(delimiter) = self.detect_delimiter() {
            profile.format_type = FormatType::Structured;
            profile.delimiter = Some(delimiter.to_string());
        } else {
            profile.format_type = FormatType::Unstructured;
        }

        self.timestamp_re = self.detect_timestamp();
        profile.has_timestamp = self.timestamp_re.is_some();
        profile.timestamp_pattern = self.timestamp_re.as_ref().map(|re| re.as_str().to_string());
        profile.common_fragments = self.common_fragments();

        info!(
            format = profile.format_type.as_str(),
            samples = self.samples.len(),
            timestamp = profile.has_timestamp,
            "Log profile complete"
        );

        self.profile = profile;
        self.state = ProfilerState::Profiled;
        &self.profile
    }

    /// Score one line against the profile. Returns true once drift trips.
    pub fn check_drift(&mut self, line: &str) -> bool {
        if self.state != ProfilerState::Profiled {
            return false;
        }

        let mut deviates = match (&self.profile.format_type, &self.profile.delimiter) {
            (FormatType::Json, _) => serde_json::from_str::<serde_json::Value>(line.trim()).is_err(),
            (_, Some(delimiter)) => !line.contains(delimiter.as_str()),
            _ => false,
        };
        if let Some(re) = &self.timestamp_re {
            if !re.is_match(line) {
                deviates = true;
            }
        }

        if deviates {
            self.profile.drift_score += 1.0;
        } else {
            self.profile.drift_score = (self.profile.drift_score - DRIFT_DECAY).max(0.0);
        }

        self.profile.drift_score > self.sample_limit as f64 * DRIFT_RATIO
    }

    /// Discard the profile and start learning again
    pub fn reset(&mut self) {
        self.samples.clear();
        self.state = ProfilerState::Learning;
        self.profile = LogProfile::default();
        self.timestamp_re = None;
    }

    /// Learning progress in [0, 1]
    pub fn progress(&self) -> f64 {
        match self.state {
            ProfilerState::Profiled => 1.0,
            ProfilerState::Learning => {
                (self.samples.len() as f64 / self.sample_limit as f64).min(1.0)
            }
        }
    }

    pub fn state(&self) -> ProfilerState {
        self.state
    }

    pub fn is_profiled(&self) -> bool {
        self.state == ProfilerState::Profiled
    }

    pub fn profile(&self) -> &LogProfile {
        &self.profile
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_limit(&self) -> usize {
        self.sample_limit
    }

    fn looks_like_json(&self) -> bool {
        let probe = &self.samples[..self.samples.len().min(JSON_PROBE_LINES)];
        let parsed = probe
            .iter()
            .filter(|s| serde_json::from_str::<serde_json::Value>(s).is_ok())
            .count();
        parsed * 2 > probe.len()
    }

    fn detect_delimiter(&self) -> Option<&'static str> {
        let threshold = self.samples.len() as f64 * DELIMITER_RATIO;
        let mut best: Option<(&'static str, usize)> = None;
        for &delimiter in DELIMITERS {
            let count = self.samples.iter().filter(|s| s.contains(delimiter)).count();
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((delimiter, count));
            }
        }
        best.filter(|(_, count)| *count as f64 > threshold)
            .map(|(delimiter, _)| delimiter)
    }

    fn detect_timestamp(&self) -> Option<Regex> {
        let threshold = self.samples.len() as f64 * TIMESTAMP_RATIO;
        TIMESTAMP_PATTERNS
            .iter()
            .find(|re| self.samples.iter().filter(|s| re.is_match(s)).count() as f64 > threshold)
            .cloned()
    }

    fn common_fragments(&self) -> Vec<String> {
        let mut seen_in: HashMap<&str, usize> = HashMap::new();
        for sample in &self.samples {
            let stripped = strip_timestamp(sample);
            let words: HashSet<&str> = WORD_RE.find_iter(stripped).map(|m| m.as_str()).collect();
            for word in words {
                *seen_in.entry(word).or_insert(0) += 1;
            }
        }

        let threshold = self.samples.len() as f64 * FRAGMENT_RATIO;
        let mut fragments: Vec<String> = seen_in
            .into_iter()
            .filter(|(_, count)| *count as f64 > threshold)
            .map(|(word, _)| word.to_string())
            .collect();
        fragments.sort();
        fragments
    }
}
