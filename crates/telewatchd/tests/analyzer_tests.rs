//! Tests for the event analysis pipeline.
//!
//! A scripted backend stands in for the external provider so call counts
//! show which stage produced each analysis.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use telewatch_common::{Config, MonitorEvent, Severity};
use telewatchd::analyzer::Period;
use telewatchd::{AnalysisBackend, BackendError, EventAnalyzer};

const DEFAULT_REPLY: &str = r#"{"severity": "WARNING", "summary": "Connection failure", "root_cause": "Upstream refused", "suggested_action": "Check the upstream service"}"#;

struct ScriptedBackend {
    calls: Arc<AtomicUsize>,
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<String, BackendError>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Self {
            calls: Arc::clone(&calls),
            replies: Mutex::new(replies.into()),
        };
        (backend, calls)
    }
}

impl AnalysisBackend for ScriptedBackend {
    fn analyze(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn analyzer_with(
    config: &Config,
    replies: Vec<Result<String, BackendError>>,
) -> (EventAnalyzer, Arc<AtomicUsize>) {
    let (backend, calls) = ScriptedBackend::new(replies);
    (EventAnalyzer::new(Box::new(backend), config), calls)
}

fn no_local_patterns() -> Config {
    let mut config = Config::default();
    config.optimization.use_local_patterns = false;
    config
}

fn warning(content: &str) -> MonitorEvent {
    MonitorEvent::new("api", Severity::Warning, content)
}

#[test]
fn test_timestamp_variants_share_cache_entry() {
    let (mut analyzer, calls) = analyzer_with(&no_local_patterns(), vec![]);

    let first = analyzer.analyze_event(warning("[2026-02-13 12:00:00] ERROR: Connection failed"));
    let second = analyzer.analyze_event(warning("[2026-02-13 12:01:00] ERROR: Connection failed"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.summary, "Connection failure");
    assert_eq!(second.summary, first.summary);

    let report = analyzer.get_token_stats(Period::Current);
    assert_eq!(report.usage.llm_calls, 1);
    assert_eq!(report.usage.cached_calls, 1);
    assert_eq!(report.usage.total_requests, 2);
}

#[test]
fn test_numeric_variants_hit_fuzzy_entry() {
    let (mut analyzer, calls) = analyzer_with(&no_local_patterns(), vec![]);

    analyzer.analyze_event(warning("ERROR: disk 45% full"));
    analyzer.analyze_event(warning("ERROR: disk 87% full"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(analyzer.get_token_stats(Period::Current).usage.cached_calls, 1);
}

#[test]
fn test_different_content_misses_cache() {
    let (mut analyzer, calls) = analyzer_with(&no_local_patterns(), vec![]);

    analyzer.analyze_event(warning("ERROR: Connection failed"));
    analyzer.analyze_event(warning("ERROR: certificate expired"));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_local_pattern_skips_backend() {
    let (mut analyzer, calls) = analyzer_with(&Config::default(), vec![]);

    let analysis = analyzer.analyze_event(warning("worker 3: core dumped"));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(analysis.severity, Severity::Critical);
    assert!(analysis.summary.starts_with("Pattern-matched: "));
    assert!(analysis.summary.contains("core dumped"));
    assert_eq!(analyzer.get_token_stats(Period::Current).usage.pattern_matched, 1);
}

#[test]
fn test_critical_tier_wins_over_warning() {
    let (mut analyzer, _calls) = analyzer_with(&Config::default(), vec![]);

    // "retrying" is a warning pattern, "out of memory" a critical one
    let analysis = analyzer.analyze_event(warning("retrying after out of memory"));
    assert_eq!(analysis.severity, Severity::Critical);
}

#[test]
fn test_info_event_skips_backend() {
    let (mut analyzer, calls) = analyzer_with(&no_local_patterns(), vec![]);

    let analysis = analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, "heartbeat 42"));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(analysis.severity, Severity::Info);
    assert_eq!(analysis.summary, "heartbeat 42");
    assert_eq!(analyzer.get_token_stats(Period::Current).usage.pattern_matched, 1);
}

#[test]
fn test_info_event_reaches_backend_when_skip_disabled() {
    let mut config = no_local_patterns();
    config.optimization.skip_llm_for_info = false;
    let (mut analyzer, calls) = analyzer_with(&config, vec![]);

    analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, "heartbeat 42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_auth_failure_is_critical_and_not_cached() {
    let (mut analyzer, calls) = analyzer_with(
        &no_local_patterns(),
        vec![Err(BackendError::Auth("HTTP 401".to_string()))],
    );

    let failed = analyzer.analyze_event(warning("ERROR: Connection failed"));
    assert_eq!(failed.severity, Severity::Critical);
    assert!(failed.root_cause.starts_with("auth: "));

    // The failure was not cached, so the same content goes out again
    let retried = analyzer.analyze_event(warning("ERROR: Connection failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(retried.summary, "Connection failure");

    let usage = analyzer.get_token_stats(Period::Current).usage;
    assert_eq!(usage.llm_calls, 2);
    assert_eq!(usage.cached_calls, 0);
}

#[test]
fn test_quota_failure_is_critical() {
    let (mut analyzer, _calls) = analyzer_with(
        &no_local_patterns(),
        vec![Err(BackendError::QuotaExhausted("insufficient_quota".to_string()))],
    );

    let analysis = analyzer.analyze_event(warning("ERROR: job failed"));
    assert_eq!(analysis.severity, Severity::Critical);
    assert!(analysis.summary.contains("quota"));
}

#[test]
fn test_connection_failure_escalates_one_tier() {
    let mut config = no_local_patterns();
    config.optimization.skip_llm_for_info = false;
    let (mut analyzer, _calls) = analyzer_with(
        &config,
        vec![
            Err(BackendError::Connection("refused".to_string())),
            Err(BackendError::Generic("model overloaded".to_string())),
        ],
    );

    let info = analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, "cache warmed"));
    assert_eq!(info.severity, Severity::Warning);
    assert!(info.root_cause.starts_with("connection: "));

    let warn = analyzer.analyze_event(warning("ERROR: job failed"));
    assert_eq!(warn.severity, Severity::Critical);
    assert!(warn.root_cause.starts_with("generic: "));
}

#[test]
fn test_unparseable_reply_is_not_cached() {
    let (mut analyzer, calls) = analyzer_with(
        &no_local_patterns(),
        vec![Ok("I think this looks bad".to_string())],
    );

    let fallback = analyzer.analyze_event(warning("ERROR: job failed"));
    assert_eq!(fallback.summary, "I think this looks bad");
    assert_eq!(fallback.root_cause, "Unable to parse LLM response");
    assert_eq!(fallback.severity, Severity::Warning);

    analyzer.analyze_event(warning("ERROR: job failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_recommended_regex_is_learned() {
    let reply = r#"{"severity": "WARNING", "summary": "Queue backlog", "root_cause": "Slow consumer", "suggested_action": "Scale workers", "recommended_regex": "queue depth \\d+"}"#;
    let (mut analyzer, calls) = analyzer_with(&Config::default(), vec![Ok(reply.to_string())]);

    let first = analyzer.analyze_event(warning("queue depth 500 exceeds limit"));
    assert_eq!(first.summary, "Queue backlog");
    assert_eq!(analyzer.matcher().dynamic_count(), 1);
    assert_eq!(analyzer.get_token_stats(Period::Current).dynamic_patterns, 1);

    // Different shape, so no cache entry; the learned pattern answers it
    let second = analyzer.analyze_event(warning("shard eu-2 reports queue depth 900"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.severity, Severity::Warning);
    assert!(second.summary.starts_with("Pattern-matched: "));
}

#[test]
fn test_invalid_recommended_regex_is_ignored() {
    let reply = r#"{"severity": "WARNING", "summary": "Odd", "recommended_regex": "(unclosed"}"#;
    let (mut analyzer, _calls) = analyzer_with(&no_local_patterns(), vec![Ok(reply.to_string())]);

    let analysis = analyzer.analyze_event(warning("ERROR: odd thing"));
    assert_eq!(analysis.summary, "Odd");
    assert_eq!(analyzer.matcher().dynamic_count(), 0);
}

#[test]
fn test_turbo_mode_skips_profiling() {
    let mut config = no_local_patterns();
    config.optimization.turbo = true;
    let (mut analyzer, calls) = analyzer_with(&config, vec![]);

    assert!(analyzer.is_turbo());
    analyzer.analyze_event(warning("ERROR: Connection failed"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(analyzer.profiler().is_none());
    assert!(analyzer.detector().is_none());
    assert!(analyzer.anomaly_stats().is_none());
    assert!(analyzer.check_stall().is_none());
    assert_eq!(analyzer.get_token_stats(Period::Current).profiler_progress, 0.0);
}

#[test]
fn test_profiler_and_detector_observe_every_event() {
    let mut config = Config::default();
    config.optimization.profiler_limit = 10;
    let (mut analyzer, _calls) = analyzer_with(&config, vec![]);

    for i in 0..5 {
        analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, format!("tick {}", i)));
    }

    let report = analyzer.get_token_stats(Period::Current);
    assert!(report.profiler_progress > 0.0);
    let stats = analyzer.anomaly_stats().unwrap();
    // "tick <NUM>" is one structure
    assert_eq!(stats.known_structures, 1);
    assert!(!analyzer.last_anomaly_report().unwrap().is_novel);
}

#[test]
fn test_cache_disabled() {
    let mut config = no_local_patterns();
    config.optimization.enable_cache = false;
    let (mut analyzer, calls) = analyzer_with(&config, vec![]);

    analyzer.analyze_event(warning("ERROR: Connection failed"));
    analyzer.analyze_event(warning("ERROR: Connection failed"));

    assert!(analyzer.cache().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(analyzer.get_token_stats(Period::Current).cached_entries, 0);
}

#[test]
fn test_prompt_includes_recent_context() {
    let mut config = no_local_patterns();
    config.process.name = "nightly-etl".to_string();
    config.process.description = "Loads warehouse tables".to_string();
    let (mut analyzer, _calls) = analyzer_with(&config, vec![]);

    let empty = analyzer.build_prompt(&warning("ERROR: first"));
    assert!(empty.contains("(No previous context)"));
    assert!(empty.contains("**Process:** nightly-etl"));
    assert!(empty.contains("**Description:** Loads warehouse tables"));
    assert!(empty.contains("recommended_regex"));

    analyzer.analyze_event(warning("2026-02-13 12:00:00 ERROR: upstream reset"));
    let prompt = analyzer.build_prompt(&warning("ERROR: second"));
    assert!(prompt.contains("api: ERROR: upstream reset"));
    assert!(!prompt.contains("(No previous context)"));
    assert!(prompt.contains("Content:\nERROR: second"));
}

#[test]
fn test_history_is_bounded() {
    let mut config = Config::default();
    config.optimization.history_limit = 3;
    let (mut analyzer, _calls) = analyzer_with(&config, vec![]);

    for i in 0..5 {
        analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, format!("line {}", i)));
    }

    let kept: Vec<&str> = analyzer.history().map(|e| e.content.as_str()).collect();
    assert_eq!(kept, vec!["line 2", "line 3", "line 4"]);
}

fn spike_config() -> Config {
    let mut config = Config::default();
    config.anomaly_detection.window_seconds = 10;
    config.anomaly_detection.spike_threshold = 1.05;
    config
}

#[test]
fn test_spike_queues_one_alert_per_burst() {
    let (mut analyzer, calls) = analyzer_with(&spike_config(), vec![]);

    for i in 0..20 {
        analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, format!("request {} served", i)));
    }

    let alerts = analyzer.take_anomaly_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Warning);
    assert!(alerts[0].summary.starts_with("Log frequency spike detected"));
    assert_eq!(alerts[0].source(), "Process");
    assert!(analyzer.take_anomaly_alerts().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_turbo_mode_queues_no_spike_alerts() {
    let mut config = spike_config();
    config.optimization.turbo = true;
    let (mut analyzer, _) = analyzer_with(&config, vec![]);

    for i in 0..20 {
        analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, format!("request {} served", i)));
    }
    assert!(analyzer.take_anomaly_alerts().is_empty());
}

#[test]
fn test_usage_report_serializes_requests() {
    let (mut analyzer, _) = analyzer_with(&Config::default(), vec![]);
    analyzer.analyze_event(MonitorEvent::new("api", Severity::Info, "service started"));

    let json = serde_json::to_value(analyzer.get_token_stats(Period::Current)).unwrap();
    assert_eq!(json["requests"], 1);
    assert!(json.get("total_requests").is_none());
    assert_eq!(json["pattern_matched"], 1);
}
