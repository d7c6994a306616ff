//! Adaptive analysis engine
//!
//! Classifies events cheaply where it can (cache, local patterns, benign-info
//! skip) and falls back to an external backend only for novel failures.

pub mod anomaly;
pub mod cache;
pub mod context;
pub mod event_analyzer;
pub mod patterns;
pub mod profiler;
pub mod signature;
pub mod usage;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind, AnomalyReport, AnomalyStats};
pub use cache::{AnalysisCache, CacheStats};
pub use event_analyzer::{parse_response, EventAnalyzer, UsageReport};
pub use patterns::SeverityPatternMatcher;
pub use profiler::{FormatType, LogProfile, LogProfiler, ProfilerState};
pub use signature::Signatures;
pub use usage::{Period, UsageSnapshot, UsageTracker};
