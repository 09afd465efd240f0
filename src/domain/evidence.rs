use serde::{Deserialize, Serialize};

/// Which of the two evidence streams an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    News,
    Social,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::News => "news",
            EvidenceKind::Social => "social",
        }
    }
}

/// Maximum items kept per (kind, symbol) buffer.
pub const EVIDENCE_CAP: usize = 50;

const SUMMARY_MAX: usize = 400;

/// A news item attached to a symbol, as buffered for fusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsEvidence {
    pub headline: String,
    pub url: String,
    pub source: String,
    pub summary: String,
    pub ingested_at_unix: i64,
}

impl NewsEvidence {
    pub fn new(headline: &str, url: &str, source: &str, summary: &str, ingested_at_unix: i64) -> Self {
        Self {
            headline: headline.trim().to_string(),
            url: url.trim().to_string(),
            source: source.trim().to_string(),
            summary: truncate_chars(summary.trim(), SUMMARY_MAX),
            ingested_at_unix,
        }
    }
}

/// A social post attached to a symbol, as buffered for fusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialEvidence {
    pub title: String,
    pub platform: String,
    pub url: String,
    #[serde(default)]
    pub engagement: serde_json::Map<String, serde_json::Value>,
    pub ingested_at_unix: i64,
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
