//! Tests for log structure profiling and drift recovery.

use telewatchd::analyzer::{FormatType, LogProfiler, ProfilerState};

fn json_line(i: usize) -> String {
    format!(r#"{{"level": "info", "msg": "processed batch", "batch": {}}}"#, i)
}

#[test]
fn test_json_stream_detected() {
    let mut profiler = LogProfiler::new(50);
    for i in 0..6 {
        profiler.add_sample(&json_line(i));
    }
    assert_eq!(profiler.state(), ProfilerState::Learning);

    let profile = profiler.profile_stream();
    assert_eq!(profile.format_type, FormatType::Json);
    assert!(profile.delimiter.is_none());
    assert!(profiler.is_profiled());
}

#[test]
fn test_csv_stream_is_structured() {
    let mut profiler = LogProfiler::new(50);
    for i in 0..8 {
        profiler.add_sample(&format!("2026-02-13 12:00:0{},worker-{},ok", i, i));
    }

    let profile = profiler.profile_stream();
    assert_eq!(profile.format_type, FormatType::Structured);
    assert_eq!(profile.delimiter.as_deref(), Some(","));
    assert!(profile.has_timestamp);
}

#[test]
fn test_pipe_delimited_stream() {
    let mut profiler = LogProfiler::new(5);
    for i in 0..5 {
        profiler.add_sample(&format!("INFO | job {} | done", i));
    }
    assert!(profiler.is_profiled());
    assert_eq!(profiler.profile().delimiter.as_deref(), Some("|"));
}

#[test]
fn test_free_text_is_unstructured() {
    let mut profiler = LogProfiler::new(4);
    for line in [
        "Starting worker pool",
        "Worker pool ready with eight threads",
        "Accepted connection from client",
        "Worker pool draining",
    ] {
        profiler.add_sample(line);
    }

    let profile = profiler.profile();
    assert_eq!(profile.format_type, FormatType::Unstructured);
    assert!(!profile.has_timestamp);
    // Present in more than half of the samples; matching is case sensitive
    assert_eq!(profile.common_fragments, vec!["pool"]);
}

#[test]
fn test_single_deviation_self_heals() {
    let mut profiler = LogProfiler::new(10);
    for i in 0..10 {
        profiler.add_sample(&json_line(i));
    }
    assert!(profiler.is_profiled());

    assert!(!profiler.add_sample("plain text interruption"));
    for i in 0..9 {
        assert!(!profiler.add_sample(&json_line(i)));
    }

    assert_eq!(profiler.state(), ProfilerState::Profiled);
    assert_eq!(profiler.profile().format_type, FormatType::Json);
    assert!(profiler.profile().drift_score < 1.0);
}

#[test]
fn test_sustained_drift_relearns() {
    let mut profiler = LogProfiler::new(10);
    for i in 0..10 {
        profiler.add_sample(&json_line(i));
    }
    assert!(profiler.is_profiled());

    let mut resets = 0;
    for i in 0..10 {
        if profiler.add_sample(&format!("plain text line {}", i)) {
            resets += 1;
        }
    }

    assert_eq!(resets, 1);
    assert_eq!(profiler.state(), ProfilerState::Learning);
    // The tripping line seeds the new sample set
    assert_eq!(profiler.sample_count(), 8);
    assert_eq!(profiler.profile().format_type, FormatType::Unknown);
}

#[test]
fn test_check_drift_ignored_while_learning() {
    let mut profiler = LogProfiler::new(10);
    assert!(!profiler.check_drift("anything"));
    assert_eq!(profiler.profile().drift_score, 0.0);
}
