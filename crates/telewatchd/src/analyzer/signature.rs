//! Content signatures and structural fingerprints.
//!
//! Exact and fuzzy signatures key the analysis cache; fingerprints drive
//! novelty detection. All of them are computed on timestamp-stripped content.

use super::context::strip_timestamp;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Characters of stripped content that take part in a signature
pub const SIGNATURE_PREVIEW_CHARS: usize = 200;

/// Hex characters kept from the digest for cache keys
const SIGNATURE_HEX_LEN: usize = 16;

/// Key prefix that separates the fuzzy key space from the exact one
const FUZZY_PREFIX: &str = "fz:";

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("uuid pattern")
});
static HEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0[xX][0-9a-fA-F]+\b").expect("hex pattern"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2,4}[-/]\d{1,2}[-/]\d{1,4}").expect("date pattern"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}:\d{2}(?:[.,]\d+)?").expect("time pattern"));
static NUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number pattern"));

/// The derived keys for one piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub exact: String,
    pub fuzzy: String,
}

impl Signatures {
    pub fn compute(source: &str, content: &str) -> Self {
        Self {
            exact: exact_signature(source, content),
            fuzzy: fuzzy_signature(source, content),
        }
    }
}

/// Hash of source plus the first 200 chars of stripped content
pub fn exact_signature(source: &str, content: &str) -> String {
    let preview = preview(content);
    short_digest(&format!("{}:{}", source, preview))
}

/// Like the exact signature, but numbers, hex literals and UUIDs are masked
pub fn fuzzy_signature(source: &str, content: &str) -> String {
    let preview = preview(content);
    let skeleton = skeletonize(&preview);
    format!(
        "{}{}",
        FUZZY_PREFIX,
        short_digest(&format!("fuzzy|{}:{}", source, skeleton))
    )
}

/// Full-length hash of a line's structural skeleton, dates and times included
pub fn structural_fingerprint(line: &str) -> String {
    let stripped = strip_timestamp(line);
    let masked = UUID_RE.replace_all(stripped, "<UUID>");
    let masked = HEX_RE.replace_all(&masked, "<HEX>");
    let masked = DATE_RE.replace_all(&masked, "<DATE>");
    let masked = TIME_RE.replace_all(&masked, "<TIME>");
    let masked = NUM_RE.replace_all(&masked, "<NUM>");
    hex::encode(Sha256::digest(masked.as_bytes()))
}

/// Mask variable tokens: UUIDs, then hex literals, then decimal runs
pub fn skeletonize(text: &str) -> String {
    let masked = UUID_RE.replace_all(text, "<UUID>");
    let masked = HEX_RE.replace_all(&masked, "<HEX>");
    NUM_RE.replace_all(&masked, "<NUM>").into_owned()
}

fn preview(content: &str) -> String {
    strip_timestamp(content)
        .chars()
        .take(SIGNATURE_PREVIEW_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn short_digest(input: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest.truncate(SIGNATURE_HEX_LEN);
    digest
}
