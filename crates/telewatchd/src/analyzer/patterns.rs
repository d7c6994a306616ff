//! Severity Pattern Matcher - regex classification without an external call
//!
//! Each tier (critical, warning, info) holds configured static patterns and
//! patterns learned at runtime. Tiers are checked most urgent first; inside a
//! tier, learned patterns are tried before static ones.

use regex::{Regex, RegexBuilder};
use telewatch_common::config::SeverityPatterns;
use telewatch_common::{Severity, WatchError};
use tracing::{debug, warn};

/// Built-in patterns used when the configuration leaves every tier empty
pub fn default_patterns() -> SeverityPatterns {
    let owned = |list: &[&str]| list.iter().map(|p| p.to_string()).collect::<Vec<_>>();
    SeverityPatterns {
        critical: owned(&[
            r"segmentation fault|segfault",
            r"out of memory|oom|memory exhausted",
            r"panic|kernel panic",
            r"fatal\s+error",
            r"database\s+(connection\s+)?failed",
            r"cannot\s+connect\s+to\s+database",
            r"core dumped",
            r"stack overflow",
            r"deadlock detected",
            r"system\s+crash",
            r"unrecoverable\s+error",
        ]),
        warning: owned(&[
            r"deprecated",
            r"retry|retrying",
            r"timeout|timed\s+out",
            r"connection\s+(lost|dropped|closed)",
            r"warn(ing)?:",
            r"potential\s+issue",
            r"performance\s+degradation",
            r"disk\s+space\s+low",
            r"rate\s+limit",
            r"quota\s+exceeded",
        ]),
        info: owned(&[
            r"start(ed|ing)",
            r"complet(ed|ion)",
            r"initializ(ed|ing)",
            r"success(ful|fully)?",
            r"ready",
            r"listening\s+on",
            r"connected\s+to",
            r"shutdown",
        ]),
    }
}

#[derive(Debug, Default)]
struct TierPatterns {
    fixed: Vec<Regex>,
    learned: Vec<Regex>,
}

impl TierPatterns {
    fn matches(&self, text: &str) -> bool {
        self.learned.iter().any(|re| re.is_match(text))
            || self.fixed.iter().any(|re| re.is_match(text))
    }
}

#[derive(Debug)]
pub struct SeverityPatternMatcher {
    /// Indexed by `tier_index`
    tiers: [TierPatterns; 3],
    version: u64,
}

fn tier_index(tier: Severity) -> usize {
    match tier {
        Severity::Critical => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    }
}

fn compile(pattern: &str) -> Result<Regex, WatchError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| WatchError::invalid_pattern(pattern, e))
}

impl SeverityPatternMatcher {
    /// Compile configured patterns; invalid ones are logged and skipped
    pub fn new(patterns: &SeverityPatterns) -> Self {
        let mut tiers: [TierPatterns; 3] = Default::default();
        for tier in Severity::PRECEDENCE {
            let slot = &mut tiers[tier_index(tier)];
            for pattern in patterns.for_tier(tier) {
                match compile(pattern) {
                    Ok(re) => slot.fixed.push(re),
                    Err(e) => warn!(tier = tier.tier_name(), "Skipping severity pattern: {}", e),
                }
            }
        }
        Self { tiers, version: 0 }
    }

    /// Configured patterns, or the built-in set when none are configured
    pub fn from_config(patterns: &SeverityPatterns) -> Self {
        if patterns.is_empty() {
            Self::new(&default_patterns())
        } else {
            Self::new(patterns)
        }
    }

    /// First matching tier, most urgent first
    pub fn match_severity(&self, text: &str) -> Option<Severity> {
        Severity::PRECEDENCE
            .into_iter()
            .find(|tier| self.tiers[tier_index(*tier)].matches(text))
    }

    /// Register a learned pattern for a tier.
    ///
    /// Returns `Ok(false)` when the pattern is already known, and an error
    /// (never applied) when it does not compile.
    pub fn add_dynamic_pattern(
        &mut self,
        pattern: &str,
        severity: Severity,
    ) -> Result<bool, WatchError> {
        let slot = &mut self.tiers[tier_index(severity)];
        if slot.learned.iter().any(|re| re.as_str() == pattern) {
            return Ok(false);
        }

        let re = match compile(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(tier = severity.tier_name(), "Rejected learned pattern: {}", e);
                return Err(e);
            }
        };
        slot.learned.push(re);
        self.version += 1;
        debug!(
            tier = severity.tier_name(),
            version = self.version,
            "Learned pattern {}",
            pattern
        );
        Ok(true)
    }

    /// First static pattern of a tier that matches, for debugging
    pub fn matching_pattern(&self, text: &str, tier: Severity) -> Option<&str> {
        self.tiers[tier_index(tier)]
            .fixed
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str())
    }

    pub fn dynamic_count(&self) -> usize {
        self.tiers.iter().map(|t| t.learned.len()).sum()
    }

    pub fn static_count(&self) -> usize {
        self.tiers.iter().map(|t| t.fixed.len()).sum()
    }

    /// Bumped on every accepted learned pattern
    pub fn version(&self) -> u64 {
        self.version
    }
}
