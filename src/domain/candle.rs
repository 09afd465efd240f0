use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Round a millisecond timestamp down to its minute boundary.
pub fn minute_bucket_ms(ts_ms: i64) -> i64 {
    (ts_ms / 60_000) * 60_000
}

/// Percentage move from open to close. Zero when the open is not positive.
pub fn change_pct(open: f64, close: f64) -> f64 {
    if open <= 0.0 {
        return 0.0;
    }
    (close - open) / open * 100.0
}

/// The mutable per-minute aggregate, as materialized from its KV hash.
///
/// The aggregator never holds one of these in memory; the hash in the KV
/// store is the only live copy and every mutation goes through the atomic
/// scripted upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCandle {
    pub symbol: String,
    pub minute_bucket_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub last_update_ms: i64,
}

impl OpenCandle {
    /// Rebuild a candle from the raw hash fields read back from the KV store.
    /// Returns None when any OHLCV field is missing or unparsable.
    pub fn from_hash(symbol: &str, minute_bucket_ms: i64, fields: &HashMap<String, String>) -> Option<Self> {
        let get = |name: &str| fields.get(name).and_then(|v| v.parse::<f64>().ok());
        Some(Self {
            symbol: symbol.to_string(),
            minute_bucket_ms,
            open: get("open")?,
            high: get("high")?,
            low: get("low")?,
            close: get("close")?,
            volume: get("volume")?,
            last_update_ms: fields
                .get("last_update_ms")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v as i64)
                .unwrap_or(0),
        })
    }
}

/// An immutable candle after finalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalizedCandle {
    pub symbol: String,
    pub minute_bucket_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub finalized_at: DateTime<Utc>,
}

impl FinalizedCandle {
    pub fn from_open(candle: &OpenCandle, finalized_at: DateTime<Utc>) -> Self {
        Self {
            symbol: candle.symbol.clone(),
            minute_bucket_ms: candle.minute_bucket_ms,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            finalized_at,
        }
    }

    pub fn change_pct(&self) -> f64 {
        change_pct(self.open, self.close)
    }
}

/// KV key for the open candle of a given symbol and minute.
pub fn candle_key(symbol: &str, minute_bucket_ms: i64) -> String {
    format!("candle:1m:{}:{}", symbol, minute_bucket_ms)
}

pub const CANDLE_KEY_PREFIX: &str = "candle:1m:";

/// Parse `(symbol, minute_bucket_ms)` back out of a candle key.
pub fn parse_candle_key(key: &str) -> Option<(String, i64)> {
    let rest = key.strip_prefix(CANDLE_KEY_PREFIX)?;
    let (symbol, minute) = rest.rsplit_once(':')?;
    if symbol.is_empty() {
        return None;
    }
    Some((symbol.to_string(), minute.parse().ok()?))
}
