//! Event Analyzer - runs the classification pipeline for one event at a time
//!
//! Order: profiler and anomaly detector (side effects only), cache, pattern
//! matcher, benign-info skip, then the external backend as the last resort.
//! Every path yields an `Analysis`; nothing here returns an error for an event.
//! The first spike of each burst is queued as a separate warning alert.

use super::anomaly::{Anomaly, AnomalyDetector, AnomalyKind, AnomalyReport, AnomalyStats};
use super::cache::AnalysisCache;
use super::context::{estimate_tokens, strip_timestamp, trim_context};
use super::patterns::SeverityPatternMatcher;
use super::profiler::LogProfiler;
use super::usage::{Period, UsageSnapshot, UsageTracker};
use crate::backend::{AnalysisBackend, BackendError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use telewatch_common::config::{OptimizationConfig, ProcessConfig};
use telewatch_common::{truncate_chars, Analysis, Config, MonitorEvent, Severity};
use tracing::{debug, info, info_span, warn, Span};

/// Characters of each prior event shown in a prompt
const CONTEXT_EVENT_CHARS: usize = 200;

/// Characters of content quoted in synthesized summaries
const PREVIEW_CHARS: usize = 150;

/// Characters of raw text kept when a response cannot be parsed
const FALLBACK_SUMMARY_CHARS: usize = 100;

/// Aggregate usage for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    #[serde(flatten)]
    pub usage: UsageSnapshot,
    pub cached_entries: usize,
    pub dynamic_patterns: usize,
    pub profiler_progress: f64,
}

/// Structured reply expected from the backend
#[derive(Debug, Default, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    root_cause: Option<String>,
    #[serde(default)]
    suggested_action: Option<String>,
    #[serde(default)]
    recommended_regex: Option<String>,
}

/// A parsed reply, plus the pattern the backend suggested, if any
#[derive(Debug)]
pub struct ParsedResponse {
    pub analysis: Analysis,
    pub recommended_regex: Option<String>,
    /// False when the reply was not valid JSON and a fallback was built
    pub structured: bool,
}

pub struct EventAnalyzer {
    backend: Box<dyn AnalysisBackend>,
    optimization: OptimizationConfig,
    process: ProcessConfig,
    profiler: Option<LogProfiler>,
    detector: Option<AnomalyDetector>,
    cache: Option<AnalysisCache>,
    matcher: SeverityPatternMatcher,
    usage: UsageTracker,
    history: VecDeque<Arc<MonitorEvent>>,
    last_report: Option<AnomalyReport>,
    /// Inside a spike episode; only its first spike is alerted
    spiking: bool,
    alerts: Vec<Arc<Analysis>>,
    span: Span,
}

impl EventAnalyzer {
    pub fn new(backend: Box<dyn AnalysisBackend>, config: &Config) -> Self {
        let optimization = config.optimization.clone();
        let turbo = optimization.turbo;

        let profiler = (!turbo).then(|| LogProfiler::new(optimization.profiler_limit));
        let detector = (!turbo).then(|| AnomalyDetector::new(&config.anomaly_detection));
        let cache = optimization
            .enable_cache
            .then(|| AnalysisCache::new(optimization.cache_max_entries, optimization.cache_ttl_seconds));

        let span = info_span!("session", process = %config.process.name);
        span.in_scope(|| {
            info!(
                backend = backend.name(),
                turbo,
                cache = optimization.enable_cache,
                "Event analyzer ready"
            );
        });

        Self {
            backend,
            matcher: SeverityPatternMatcher::from_config(&config.severity_patterns),
            history: VecDeque::with_capacity(optimization.history_limit),
            optimization,
            process: config.process.clone(),
            profiler,
            detector,
            cache,
            usage: UsageTracker::new(),
            last_report: None,
            spiking: false,
            alerts: Vec::new(),
            span,
        }
    }

    /// Classify one event
    pub fn analyze_event(&mut self, event: MonitorEvent) -> Arc<Analysis> {
        let span = self.span.clone();
        let _enter = span.enter();

        let event = Arc::new(event);
        let analysis = self.classify(&event);
        self.remember(event);
        analysis
    }

    fn classify(&mut self, event: &Arc<MonitorEvent>) -> Arc<Analysis> {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.add_sample(&event.content);
        }
        if let Some(detector) = self.detector.as_mut() {
            let report = detector.add_event(&event.content);
            if report.is_novel {
                debug!(source = %event.source, "Novel log structure");
            }
            let spike = report.anomalies.iter().find(|a| a.kind == AnomalyKind::Spike);
            match spike {
                Some(anomaly) if !self.spiking => {
                    let alert = self.anomaly_analysis(
                        anomaly,
                        "Log volume well above the learned baseline",
                        "Check for retry loops, error storms or a change in load",
                    );
                    self.alerts.push(alert);
                }
                _ => {}
            }
            self.spiking = spike.is_some();
            self.last_report = Some(report);
        }

        if let Some(hit) = self.cache.as_mut().and_then(|c| c.get(event)) {
            debug!(source = %event.source, "Cache hit");
            self.usage.record_cache_hit();
            return hit;
        }

        if self.optimization.use_local_patterns {
            if let Some(severity) = self.matcher.match_severity(&event.content) {
                debug!(source = %event.source, severity = %severity, "Pattern match");
                let analysis = Arc::new(Analysis::new(
                    severity,
                    &format!("Pattern-matched: {}", preview(&event.content)),
                    &format!("Matched a known {} pattern", severity.tier_name()),
                    "Review the source if this repeats",
                    Arc::clone(event),
                ));
                return self.store_local(event, analysis);
            }
        }

        if self.optimization.skip_llm_for_info && event.severity == Severity::Info {
            debug!(source = %event.source, "Skipping external analysis for info event");
            let analysis = Arc::new(Analysis::new(
                Severity::Info,
                &preview(&event.content),
                "Routine output",
                "None",
                Arc::clone(event),
            ));
            return self.store_local(event, analysis);
        }

        self.analyze_remote(event)
    }

    fn store_local(&mut self, event: &MonitorEvent, analysis: Arc<Analysis>) -> Arc<Analysis> {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(event, Arc::clone(&analysis));
        }
        self.usage.record_pattern_match();
        analysis
    }

    fn analyze_remote(&mut self, event: &Arc<MonitorEvent>) -> Arc<Analysis> {
        let prompt = self.build_prompt(event);
        let sent = estimate_tokens(&prompt) as u64;

        info!(source = %event.source, backend = self.backend.name(), "Requesting external analysis");
        let response = match self.backend.analyze(&prompt) {
            Ok(response) => response,
            Err(err) => {
                warn!(category = err.category(), "External analysis failed: {}", err);
                self.usage.record_llm_call(sent, 0);
                return Arc::new(failure_analysis(&err, self.backend.name(), event));
            }
        };
        self.usage.record_llm_call(sent, estimate_tokens(&response) as u64);

        let parsed = parse_response(&response, Arc::clone(event));
        if !parsed.structured {
            warn!(source = %event.source, "Unparseable analysis response");
            return Arc::new(parsed.analysis);
        }

        if let Some(pattern) = parsed.recommended_regex.as_deref() {
            let severity = parsed.analysis.severity;
            // Rejections are logged by the matcher
            if let Ok(true) = self.matcher.add_dynamic_pattern(pattern, severity) {
                info!(tier = severity.tier_name(), "Learned pattern {}", pattern);
            }
        }

        let analysis = Arc::new(parsed.analysis);
        if let Some(cache) = self.cache.as_mut() {
            cache.put(event, Arc::clone(&analysis));
        }
        analysis
    }

    /// Prompt with process context, recent events and the trimmed current event
    pub fn build_prompt(&self, event: &MonitorEvent) -> String {
        let mut prompt = String::from(
            "You are analyzing logs from a monitoring system. Based on the information below, \
             provide a structured analysis.\n\n",
        );

        prompt.push_str(&format!("**Process:** {}\n", self.process.name));
        if !self.process.description.is_empty() {
            prompt.push_str(&format!("**Description:** {}\n", self.process.description));
        }

        prompt.push_str(
            "\n**Your task:**\n\
             1. Assess the severity (CRITICAL, WARNING, or INFO)\n\
             2. Identify the root cause if it's an error\n\
             3. Suggest a specific action to take\n\
             4. Provide a one-line summary\n\
             5. If this is a recurring error shape, suggest a regex that would match it\n\n\
             **Recent Context (previous events):**\n",
        );

        let skip = self.history.len().saturating_sub(self.optimization.context_size);
        let context: Vec<&Arc<MonitorEvent>> = self.history.iter().skip(skip).collect();
        if context.is_empty() || self.optimization.context_size == 0 {
            prompt.push_str("(No previous context)\n");
        } else {
            for prior in context {
                let content = if self.optimization.include_timestamps {
                    prior.content.as_str()
                } else {
                    strip_timestamp(&prior.content)
                };
                prompt.push_str(&format!(
                    "[{}] {}: {}\n",
                    prior.timestamp.format("%H:%M:%S"),
                    prior.source,
                    truncate_chars(content, CONTEXT_EVENT_CHARS)
                ));
            }
        }

        let content = trim_context(
            &event.content,
            self.optimization.max_context_lines,
            self.optimization.include_timestamps,
        );
        prompt.push_str(&format!(
            "\n**Current Event:**\nSource: {}\nTime: {}\nContent:\n{}\n",
            event.source,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            content
        ));

        prompt.push_str(
            "\n**Required Response Format (JSON):**\n\
             {\n  \"severity\": \"CRITICAL|WARNING|INFO\",\n  \
             \"summary\": \"One-line description\",\n  \
             \"root_cause\": \"What caused this (if error)\",\n  \
             \"suggested_action\": \"What to do next\",\n  \
             \"recommended_regex\": \"Optional regex matching similar lines\"\n}\n\n\
             Respond ONLY with valid JSON.\n",
        );
        prompt
    }

    /// Stall check surfaced as an analysis; `None` in turbo mode
    pub fn check_stall(&mut self) -> Option<Arc<Analysis>> {
        let span = self.span.clone();
        let _enter = span.enter();

        let anomaly = self.detector.as_mut()?.check_stall()?;
        Some(self.anomaly_analysis(
            &anomaly,
            &format!("No new output from {}", self.process.name),
            "Check whether the process is hung, blocked on I/O, or has exited",
        ))
    }

    /// Spike alerts queued since the last call
    pub fn take_anomaly_alerts(&mut self) -> Vec<Arc<Analysis>> {
        std::mem::take(&mut self.alerts)
    }

    fn anomaly_analysis(&self, anomaly: &Anomaly, root_cause: &str, action: &str) -> Arc<Analysis> {
        let event = Arc::new(MonitorEvent::new(
            self.process.name.clone(),
            anomaly.severity,
            anomaly.message.clone(),
        ));
        Arc::new(Analysis::new(
            anomaly.severity,
            &anomaly.message,
            root_cause,
            action,
            event,
        ))
    }

    pub fn get_token_stats(&self, period: Period) -> UsageReport {
        UsageReport {
            usage: self.usage.snapshot(period),
            cached_entries: self.cache.as_ref().map_or(0, |c| c.len()),
            dynamic_patterns: self.matcher.dynamic_count(),
            profiler_progress: self.profiler.as_ref().map_or(0.0, |p| p.progress()),
        }
    }

    pub fn usage_summary(&self, period: Period) -> String {
        self.usage.summary(period)
    }

    pub fn is_turbo(&self) -> bool {
        self.optimization.turbo
    }

    pub fn profiler(&self) -> Option<&LogProfiler> {
        self.profiler.as_ref()
    }

    pub fn detector(&self) -> Option<&AnomalyDetector> {
        self.detector.as_ref()
    }

    pub fn anomaly_stats(&self) -> Option<AnomalyStats> {
        self.detector.as_ref().map(|d| d.stats())
    }

    /// Detector outcome for the most recent event
    pub fn last_anomaly_report(&self) -> Option<&AnomalyReport> {
        self.last_report.as_ref()
    }

    pub fn cache(&self) -> Option<&AnalysisCache> {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut AnalysisCache> {
        self.cache.as_mut()
    }

    pub fn matcher(&self) -> &SeverityPatternMatcher {
        &self.matcher
    }

    pub fn matcher_mut(&mut self) -> &mut SeverityPatternMatcher {
        &mut self.matcher
    }

    pub fn history(&self) -> impl Iterator<Item = &MonitorEvent> {
        self.history.iter().map(|e| e.as_ref())
    }

    fn remember(&mut self, event: Arc<MonitorEvent>) {
        let limit = self.optimization.history_limit;
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

/// Parse a backend reply, falling back to the raw text when it is not JSON
pub fn parse_response(response: &str, event: Arc<MonitorEvent>) -> ParsedResponse {
    let body = unwrap_code_fence(response.trim());

    match serde_json::from_str::<AnalysisResponse>(body) {
        Ok(data) => {
            let severity = data
                .severity
                .as_deref()
                .and_then(Severity::parse)
                .unwrap_or(Severity::Info);
            let recommended_regex = data
                .recommended_regex
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());
            ParsedResponse {
                analysis: Analysis::new(
                    severity,
                    data.summary.as_deref().unwrap_or("Event detected"),
                    data.root_cause.as_deref().unwrap_or("Unknown"),
                    data.suggested_action.as_deref().unwrap_or("Monitor"),
                    event,
                ),
                recommended_regex,
                structured: true,
            }
        }
        Err(_) => {
            let raw = response.trim();
            let summary = if raw.is_empty() {
                truncate_chars(&event.content, FALLBACK_SUMMARY_CHARS)
            } else {
                truncate_chars(raw, FALLBACK_SUMMARY_CHARS)
            };
            ParsedResponse {
                analysis: Analysis::new(
                    event.severity,
                    &summary,
                    "Unable to parse LLM response",
                    "Review original event",
                    event,
                ),
                recommended_regex: None,
                structured: false,
            }
        }
    }
}

/// Body of a ```json or bare ``` fence, or the input unchanged
fn unwrap_code_fence(text: &str) -> &str {
    let (marker, start) = match (text.find("```json"), text.find("```")) {
        (Some(i), _) => ("```json", i),
        (None, Some(i)) => ("```", i),
        (None, None) => return text,
    };
    let inner = &text[start + marker.len()..];
    match inner.find("```") {
        Some(end) => inner[..end].trim(),
        None => inner.trim(),
    }
}

/// Degraded analysis describing the backend failure rather than the event
fn failure_analysis(err: &BackendError, backend: &str, event: &Arc<MonitorEvent>) -> Analysis {
    let (severity, summary, action) = match err {
        BackendError::Auth(_) => (
            Severity::Critical,
            format!("Analysis backend authentication failed ({})", backend),
            "Check llm.api_key and the provider account".to_string(),
        ),
        BackendError::QuotaExhausted(_) => (
            Severity::Critical,
            format!("Analysis backend quota exhausted ({})", backend),
            "Add credits or switch provider; local patterns still classify events".to_string(),
        ),
        BackendError::Connection(_) => (
            event.severity.escalated(),
            format!("Analysis backend unreachable ({})", backend),
            "Check network access or that the local model server is running".to_string(),
        ),
        BackendError::Generic(_) => (
            event.severity.escalated(),
            format!("Analysis backend error ({})", backend),
            "Review the original event manually".to_string(),
        ),
    };
    Analysis::new(
        severity,
        &summary,
        &format!("{}: {}", err.category(), err.message()),
        &action,
        Arc::clone(event),
    )
}

fn preview(content: &str) -> String {
    truncate_chars(strip_timestamp(content.trim()), PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Arc<MonitorEvent> {
        Arc::new(MonitorEvent::new("api", Severity::Warning, "ERROR: boom"))
    }

    #[test]
    fn test_parse_plain_json() {
        let parsed = parse_response(
            r#"{"severity": "CRITICAL", "summary": "Disk full", "root_cause": "Logs", "suggested_action": "Rotate"}"#,
            event(),
        );
        assert!(parsed.structured);
        assert_eq!(parsed.analysis.severity, Severity::Critical);
        assert_eq!(parsed.analysis.summary, "Disk full");
        assert!(parsed.recommended_regex.is_none());
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"severity\": \"warning\", \"recommended_regex\": \"disk \\\\d+% full\"}\n```";
        let parsed = parse_response(reply, event());
        assert!(parsed.structured);
        assert_eq!(parsed.analysis.severity, Severity::Warning);
        assert_eq!(parsed.analysis.summary, "Event detected");
        assert_eq!(parsed.analysis.root_cause, "Unknown");
        assert_eq!(parsed.analysis.suggested_action, "Monitor");
        assert_eq!(parsed.recommended_regex.as_deref(), Some(r"disk \d+% full"));
    }

    #[test]
    fn test_parse_bare_fence() {
        let parsed = parse_response("```\n{\"summary\": \"ok\"}\n```", event());
        assert!(parsed.structured);
        assert_eq!(parsed.analysis.summary, "ok");
    }

    #[test]
    fn test_unknown_severity_is_info() {
        let parsed = parse_response(r#"{"severity": "SEVERE"}"#, event());
        assert_eq!(parsed.analysis.severity, Severity::Info);
    }

    #[test]
    fn test_parse_failure_fallback() {
        let parsed = parse_response("the model rambled instead", event());
        assert!(!parsed.structured);
        assert_eq!(parsed.analysis.severity, Severity::Warning);
        assert_eq!(parsed.analysis.summary, "the model rambled instead");
        assert_eq!(parsed.analysis.root_cause, "Unable to parse LLM response");
        assert_eq!(parsed.analysis.suggested_action, "Review original event");
    }

    #[test]
    fn test_empty_reply_falls_back_to_content() {
        let parsed = parse_response("   ", event());
        assert_eq!(parsed.analysis.summary, "ERROR: boom");
    }

    #[test]
    fn test_failure_analysis_severity() {
        let e = event();
        let auth = failure_analysis(&BackendError::Auth("401".into()), "openai", &e);
        assert_eq!(auth.severity, Severity::Critical);
        assert!(auth.root_cause.starts_with("auth: "));

        let conn = failure_analysis(&BackendError::Connection("refused".into()), "ollama", &e);
        assert_eq!(conn.severity, Severity::Critical);
        assert!(conn.summary.contains("unreachable"));

        let info = Arc::new(MonitorEvent::new("api", Severity::Info, "x"));
        let generic = failure_analysis(&BackendError::Generic("?".into()), "groq", &info);
        assert_eq!(generic.severity, Severity::Warning);
    }
}
