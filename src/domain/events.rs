use crate::domain::candle::FinalizedCandle;
use crate::domain::evidence::{NewsEvidence, SocialEvidence};
use crate::domain::fusion::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound topic carrying raw trades and streamer heartbeats.
pub const TOPIC_TRADES_RAW: &str = "trades.raw";
/// Inbound topic carrying raw news items.
pub const TOPIC_NEWS_RAW: &str = "news.raw";
/// Inbound topic carrying raw social posts.
pub const TOPIC_SOCIAL_RAW: &str = "social.raw";
/// Outbound topic carrying finalized candles and fused events.
pub const TOPIC_EVENTS_NORMALIZED: &str = "events.normalized";

pub const KIND_CANDLE_1M: &str = "candle_1m";
pub const KIND_FUSED_EVENT: &str = "fused_event";

/// A single trade from the market feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub event_type: String,
    pub symbol: String,
    pub timestamp_ms: i64,
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub source_tag: String,
}

impl TradeEvent {
    pub fn new(symbol: &str, timestamp_ms: i64, price: f64, volume: f64, source_tag: &str) -> Self {
        Self {
            event_type: "trade".to_string(),
            symbol: symbol.to_string(),
            timestamp_ms,
            price,
            volume,
            source_tag: source_tag.to_string(),
        }
    }

    /// Heartbeats and subscription acks share the topic; only real trades pass.
    pub fn is_trade(&self) -> bool {
        self.event_type == "trade"
    }
}

/// Periodic liveness marker published on the trade topic. Consumers ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub event_type: String,
    pub ingested_at: DateTime<Utc>,
    pub message: String,
}

impl HeartbeatEvent {
    pub fn new(message: &str) -> Self {
        Self {
            event_type: "heartbeat".to_string(),
            ingested_at: Utc::now(),
            message: message.to_string(),
        }
    }
}

/// A raw news item as published by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRawEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub ingested_at_iso: String,
    /// Comma-separated ticker list when the provider supplies one.
    #[serde(default)]
    pub provider_symbol_list: String,
    #[serde(default)]
    pub provider_category: String,
}

/// A raw social post from one of the platform connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialRawEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub engagement: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub ingested_at_iso: String,
}

/// Finalized one-minute candle as carried on the normalized topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle1mEvent {
    pub event_kind: String,
    pub symbol: String,
    pub minute_bucket_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub finalized_at: DateTime<Utc>,
}

impl Candle1mEvent {
    pub fn from_candle(c: &FinalizedCandle) -> Self {
        Self {
            event_kind: KIND_CANDLE_1M.to_string(),
            symbol: c.symbol.clone(),
            minute_bucket_ms: c.minute_bucket_ms,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            finalized_at: c.finalized_at,
        }
    }
}

/// Price block carried inside a fused event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedPrice {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub change_pct: f64,
}

/// A finalized candle joined with the evidence observed for its symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedEvent {
    pub event_kind: String,
    pub symbol: String,
    pub minute_bucket_ms: i64,
    pub price: FusedPrice,
    pub news: Vec<NewsEvidence>,
    pub social: Vec<SocialEvidence>,
    pub severity: u8,
    pub direction: Direction,
    pub fused_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_event_roundtrip() {
        let ev = TradeEvent::new("AAPL", 1_700_000_015_000, 150.0, 10.0, "finnhub");
        let json = serde_json::to_string(&ev).unwrap();
        let back: TradeEvent = serde_json::from_str(&json).unwrap();
        assert!(back.is_trade());
        assert_eq!(back.symbol, "AAPL");
        assert_eq!(back.timestamp_ms, 1_700_000_015_000);
    }

    #[test]
    fn heartbeat_is_not_a_trade() {
        let hb = HeartbeatEvent::new("streamer alive");
        let json = serde_json::to_value(&hb).unwrap();
        // A heartbeat parsed as a trade must be rejected by is_trade().
        let as_trade: Result<TradeEvent, _> = serde_json::from_value(json);
        if let Ok(t) = as_trade {
            assert!(!t.is_trade());
        }
    }

    #[test]
    fn candle_event_carries_kind_tag() {
        let c = FinalizedCandle {
            symbol: "TSLA".to_string(),
            minute_bucket_ms: 1_700_000_000_000,
            open: 240.0,
            high: 245.0,
            low: 238.0,
            close: 243.0,
            volume: 50_000.0,
            finalized_at: Utc::now(),
        };
        let ev = Candle1mEvent::from_candle(&c);
        assert_eq!(ev.event_kind, KIND_CANDLE_1M);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event_kind"], "candle_1m");
    }
}
