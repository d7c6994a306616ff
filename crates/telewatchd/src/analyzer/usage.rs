//! Usage tracking - external calls performed vs. avoided, per period.
//!
//! Counters live in memory only. Hourly and daily buckets roll over on the
//! first record after their period has elapsed.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Current,
    Hourly,
    Daily,
}

impl Period {
    /// Unknown names fall back to the current session
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hourly" | "hour" => Period::Hourly,
            "daily" | "day" => Period::Daily,
            _ => Period::Current,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Current => "current",
            Period::Hourly => "hourly",
            Period::Daily => "daily",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one period
#[derive(Debug, Clone)]
pub struct TokenStats {
    pub requests: u64,
    pub llm_calls: u64,
    pub cached_calls: u64,
    pub pattern_matched: u64,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub started: Instant,
}

impl TokenStats {
    fn new(started: Instant) -> Self {
        Self {
            requests: 0,
            llm_calls: 0,
            cached_calls: 0,
            pattern_matched: 0,
            tokens_sent: 0,
            tokens_received: 0,
            started,
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        rate(self.cached_calls, self.cached_calls + self.llm_calls)
    }

    pub fn pattern_match_rate(&self) -> f64 {
        rate(self.pattern_matched, self.pattern_matched + self.llm_calls)
    }
}

/// Percentage rounded to one decimal
fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Point-in-time view of one period's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub period: Period,
    #[serde(rename = "requests")]
    pub total_requests: u64,
    pub llm_calls: u64,
    pub cached_calls: u64,
    pub pattern_matched: u64,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub total_tokens: u64,
    pub cache_hit_rate: f64,
    pub pattern_match_rate: f64,
    pub uptime_seconds: u64,
}

pub struct UsageTracker {
    current: TokenStats,
    hourly: TokenStats,
    daily: TokenStats,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            current: TokenStats::new(now),
            hourly: TokenStats::new(now),
            daily: TokenStats::new(now),
        }
    }

    pub fn record_llm_call(&mut self, tokens_sent: u64, tokens_received: u64) {
        self.record_llm_call_at(tokens_sent, tokens_received, Instant::now());
    }

    pub fn record_llm_call_at(&mut self, tokens_sent: u64, tokens_received: u64, now: Instant) {
        self.roll_over(now);
        for stats in self.buckets_mut() {
            stats.requests += 1;
            stats.llm_calls += 1;
            stats.tokens_sent += tokens_sent;
            stats.tokens_received += tokens_received;
        }
    }

    pub fn record_cache_hit(&mut self) {
        self.record_cache_hit_at(Instant::now());
    }

    pub fn record_cache_hit_at(&mut self, now: Instant) {
        self.roll_over(now);
        for stats in self.buckets_mut() {
            stats.requests += 1;
            stats.cached_calls += 1;
        }
    }

    pub fn record_pattern_match(&mut self) {
        self.record_pattern_match_at(Instant::now());
    }

    pub fn record_pattern_match_at(&mut self, now: Instant) {
        self.roll_over(now);
        for stats in self.buckets_mut() {
            stats.requests += 1;
            stats.pattern_matched += 1;
        }
    }

    pub fn stats(&self, period: Period) -> &TokenStats {
        match period {
            Period::Current => &self.current,
            Period::Hourly => &self.hourly,
            Period::Daily => &self.daily,
        }
    }

    pub fn snapshot(&self, period: Period) -> UsageSnapshot {
        let stats = self.stats(period);
        UsageSnapshot {
            period,
            total_requests: stats.requests,
            llm_calls: stats.llm_calls,
            cached_calls: stats.cached_calls,
            pattern_matched: stats.pattern_matched,
            tokens_sent: stats.tokens_sent,
            tokens_received: stats.tokens_received,
            total_tokens: stats.tokens_sent + stats.tokens_received,
            cache_hit_rate: stats.cache_hit_rate(),
            pattern_match_rate: stats.pattern_match_rate(),
            uptime_seconds: stats.started.elapsed().as_secs(),
        }
    }

    /// Human-readable summary for status output
    pub fn summary(&self, period: Period) -> String {
        let s = self.snapshot(period);
        let mut title = period.as_str().to_string();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        [
            format!("Token Usage ({})", title),
            format!("  Total Requests: {}", s.total_requests),
            format!("  LLM Calls: {}", s.llm_calls),
            format!("  Cache Hits: {} ({}%)", s.cached_calls, s.cache_hit_rate),
            format!("  Pattern Matches: {} ({}%)", s.pattern_matched, s.pattern_match_rate),
            format!("  Tokens: {} sent / {} received", s.tokens_sent, s.tokens_received),
        ]
        .join("\n")
    }

    pub fn reset_current(&mut self) {
        self.current = TokenStats::new(Instant::now());
    }

    fn buckets_mut(&mut self) -> [&mut TokenStats; 3] {
        [&mut self.current, &mut self.hourly, &mut self.daily]
    }

    fn roll_over(&mut self, now: Instant) {
        if now.saturating_duration_since(self.hourly.started) > HOUR {
            self.hourly = TokenStats::new(now);
        }
        if now.saturating_duration_since(self.daily.started) > DAY {
            self.daily = TokenStats::new(now);
        }
    }
}
