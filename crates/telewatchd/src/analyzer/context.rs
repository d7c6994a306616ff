//! Prompt context trimming.
//!
//! Strips leading timestamps and keeps only the lines most likely to matter
//! for diagnosis, so prompts stay small.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading timestamp shapes, tried in order
static TIMESTAMP_PREFIXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 2026-02-12 13:45:32.123 / 2026-02-12T13:45:32Z
        r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?\s+",
        // [2026-02-12 13:45:32]
        r"^\[\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?\]\s*",
        // Feb 12 13:45:32
        r"^[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+",
        // 13:45:32.123
        r"^\d{2}:\d{2}:\d{2}[.,]\d+\s+",
        // 1739367932 / 1739367932123
        r"^\d{10,13}(?:\.\d+)?\s+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("timestamp prefix pattern"))
    .collect()
});

/// Keywords that mark a line as diagnostic
const PRIORITY_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "fatal",
    "critical",
    "failed",
    "traceback",
    "stack trace",
    "panic",
    "warn",
    "at line",
    "file \"",
    ".py:",
    ".js:",
    ".java:",
    ".rs:",
];

/// Remove a recognized leading timestamp from a line
pub fn strip_timestamp(line: &str) -> &str {
    for re in TIMESTAMP_PREFIXES.iter() {
        if let Some(m) = re.find(line) {
            return &line[m.end()..];
        }
    }
    line
}

/// Keep at most `max_lines` of the most relevant lines, in original order
pub fn trim_context(content: &str, max_lines: usize, include_timestamps: bool) -> String {
    let lines: Vec<&str> = content
        .lines()
        .map(|line| {
            if include_timestamps {
                line
            } else {
                strip_timestamp(line)
            }
        })
        .collect();

    extract_relevant_lines(&lines, max_lines).join("\n")
}

fn extract_relevant_lines<'a>(lines: &[&'a str], max_lines: usize) -> Vec<&'a str> {
    if lines.len() <= max_lines {
        return lines.to_vec();
    }

    let total = lines.len() as f64;
    let mut scored: Vec<(f64, usize)> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let lower = line.to_lowercase();
            let keyword_hits = PRIORITY_KEYWORDS
                .iter()
                .filter(|kw| lower.contains(*kw))
                .count();
            let mut score = keyword_hits as f64 * 10.0;
            // Recent lines carry more weight
            score += (i as f64 / total) * 5.0;
            if !line.trim().is_empty() {
                score += 1.0;
            }
            (score, i)
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut keep: Vec<usize> = scored.into_iter().take(max_lines).map(|(_, i)| i).collect();
    keep.sort_unstable();

    keep.into_iter().map(|i| lines[i]).collect()
}

/// Rough token estimate: one token per four characters
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_iso_timestamp() {
        assert_eq!(strip_timestamp("2026-02-12 13:45:32.123 ERROR boom"), "ERROR boom");
        assert_eq!(strip_timestamp("2026-02-12T13:45:32Z worker up"), "worker up");
    }

    #[test]
    fn test_strip_bracketed_timestamp() {
        assert_eq!(
            strip_timestamp("[2026-02-13 12:00:00] ERROR: Connection failed"),
            "ERROR: Connection failed"
        );
    }

    #[test]
    fn test_strip_syslog_and_epoch() {
        assert_eq!(strip_timestamp("Feb 12 13:45:32 host sshd[1]: ok"), "host sshd[1]: ok");
        assert_eq!(strip_timestamp("1739367932 tick"), "tick");
        assert_eq!(strip_timestamp("13:45:32.500 tock"), "tock");
    }

    #[test]
    fn test_strip_leaves_plain_lines() {
        assert_eq!(strip_timestamp("ERROR: disk 45% full"), "ERROR: disk 45% full");
        assert_eq!(strip_timestamp("42 items"), "42 items");
    }

    #[test]
    fn test_trim_context_short_input_untouched() {
        let content = "one\ntwo\nthree";
        assert_eq!(trim_context(content, 15, true), content);
    }

    #[test]
    fn test_trim_context_prefers_errors() {
        let mut lines: Vec<String> = (0..30).map(|i| format!("step {} ok", i)).collect();
        lines[3] = "Traceback (most recent call last):".to_string();
        lines[4] = "ValueError: bad input".to_string();
        let content = lines.join("\n");

        let trimmed = trim_context(&content, 5, false);
        let kept: Vec<&str> = trimmed.lines().collect();
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0], "Traceback (most recent call last):");
        assert_eq!(kept[1], "ValueError: bad input");
        // Remaining slots go to the most recent lines, still in order
        assert_eq!(kept[4], "step 29 ok");
    }

    #[test]
    fn test_trim_context_strips_timestamps() {
        let content = "[2026-02-13 12:00:00] ERROR: one\n[2026-02-13 12:00:01] ERROR: two";
        assert_eq!(trim_context(content, 15, false), "ERROR: one\nERROR: two");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
