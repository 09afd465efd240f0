use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a fused event.
///
/// `Mixed` is part of the schema for forward compatibility with a sentiment
/// classifier; nothing in the engine currently produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Direction {
    pub fn from_change_pct(pct: f64) -> Self {
        if pct > 0.0 {
            Direction::Positive
        } else if pct < 0.0 {
            Direction::Negative
        } else {
            Direction::Neutral
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Positive => write!(f, "positive"),
            Direction::Negative => write!(f, "negative"),
            Direction::Neutral => write!(f, "neutral"),
            Direction::Mixed => write!(f, "mixed"),
        }
    }
}

/// Severity of a fused event, 0..=100.
///
/// `round(15·|pct|)` for the price term, plus capped evidence boosts:
/// news contributes 8 per item up to 50, social 5 per item up to 30.
pub fn compute_severity(pct: f64, news_count: usize, social_count: usize) -> u8 {
    let base = (15.0 * pct.abs()).round() as i64;
    let news_boost = (news_count as i64 * 8).min(50);
    let social_boost = (social_count as i64 * 5).min(30);
    (base + news_boost + social_boost).clamp(0, 100) as u8
}
