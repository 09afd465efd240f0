use crate::application::evidence_buffer::EvidenceBuffer;
use crate::domain::candle::change_pct;
use crate::domain::events::{
    Candle1mEvent, FusedEvent, FusedPrice, KIND_CANDLE_1M, KIND_FUSED_EVENT, NewsRawEvent,
    SocialRawEvent, TOPIC_EVENTS_NORMALIZED,
};
use crate::domain::evidence::{NewsEvidence, SocialEvidence};
use crate::domain::fusion::{Direction, compute_severity};
use crate::domain::ports::{EventBus, KvStore};
use crate::domain::symbols;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVIDENCE_ITEMS_PER_SIDE: usize = 5;
const LATEST_CLOSE_TTL_SEC: u64 = 21_600;

pub struct FusionConfig {
    pub join_threshold_pct: f64,
    pub news_lookback_sec: u64,
    pub social_lookback_sec: u64,
    pub evidence_retention_sec: u64,
    pub watchlist: HashSet<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            join_threshold_pct: 0.25,
            news_lookback_sec: 1800,
            social_lookback_sec: 3600,
            evidence_retention_sec: 7200,
            watchlist: HashSet::new(),
        }
    }
}

/// Joins finalized candles with the evidence gathered for their symbol.
///
/// News and social ingest feed the evidence buffer; candle ingest reads it
/// back and emits a scored fused event when the move clears the threshold.
pub struct FusionEngine {
    kv: Arc<dyn KvStore>,
    buffer: EvidenceBuffer,
    bus: Arc<dyn EventBus>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(kv: Arc<dyn KvStore>, bus: Arc<dyn EventBus>, config: FusionConfig) -> Self {
        Self {
            buffer: EvidenceBuffer::new(kv.clone()),
            kv,
            bus,
            config,
        }
    }

    /// Dispatch one bus payload to the matching ingest path. Unknown or
    /// malformed payloads are dropped.
    pub async fn handle_payload(&self, payload: &Value) {
        let event_type = payload.get("event_type").and_then(Value::as_str).unwrap_or("");
        let event_kind = payload.get("event_kind").and_then(Value::as_str).unwrap_or("");

        if event_type == "news" {
            match serde_json::from_value::<NewsRawEvent>(payload.clone()) {
                Ok(ev) => self.on_news(&ev).await,
                Err(e) => warn!("Invalid news event: {}", e),
            }
        } else if event_type == "social" {
            match serde_json::from_value::<SocialRawEvent>(payload.clone()) {
                Ok(ev) => self.on_social(&ev).await,
                Err(e) => warn!("Invalid social event: {}", e),
            }
        } else if event_kind == KIND_CANDLE_1M {
            match serde_json::from_value::<Candle1mEvent>(payload.clone()) {
                Ok(ev) => {
                    self.on_candle(&ev).await;
                }
                Err(e) => warn!("Invalid candle event: {}", e),
            }
        }
    }

    /// Attach a news item to every symbol it references.
    pub async fn on_news(&self, ev: &NewsRawEvent) {
        let mut syms = symbols::from_provider_list(&ev.provider_symbol_list);
        if syms.is_empty() {
            syms = symbols::from_text(&ev.headline);
        }
        let syms = symbols::filter_watchlist(syms, &self.config.watchlist);
        if syms.is_empty() {
            return;
        }

        let item = NewsEvidence::new(
            &ev.headline,
            &ev.url,
            &ev.source,
            &ev.summary,
            Utc::now().timestamp(),
        );

        for sym in syms.iter().take(symbols::FANOUT_CAP) {
            self.buffer
                .append_news(sym, &item, self.config.evidence_retention_sec)
                .await;
            debug!("Buffered news for {}", sym);
        }
    }

    /// Attach a social post to every symbol its title/text references.
    pub async fn on_social(&self, ev: &SocialRawEvent) {
        let text = format!("{} {}", ev.title, ev.text);
        let syms = symbols::filter_watchlist(symbols::from_text(&text), &self.config.watchlist);
        if syms.is_empty() {
            return;
        }

        let item = SocialEvidence {
            title: ev.title.trim().to_string(),
            platform: ev.platform.clone(),
            url: ev.url.clone(),
            engagement: ev.engagement.clone(),
            ingested_at_unix: Utc::now().timestamp(),
        };

        for sym in syms.iter().take(symbols::FANOUT_CAP) {
            self.buffer
                .append_social(sym, &item, self.config.evidence_retention_sec)
                .await;
            debug!("Buffered social signal for {}", sym);
        }
    }

    pub async fn on_candle(&self, candle: &Candle1mEvent) -> Option<FusedEvent> {
        self.on_candle_at(candle, Utc::now().timestamp()).await
    }

    /// Candle ingest with an explicit clock, the testable core of the join.
    pub async fn on_candle_at(&self, candle: &Candle1mEvent, now_unix: i64) -> Option<FusedEvent> {
        // Latest close cache for downstream reference; losing it is harmless.
        let close_fields = vec![
            ("close".to_string(), candle.close.to_string()),
            ("minute_bucket_ms".to_string(), candle.minute_bucket_ms.to_string()),
        ];
        if let Err(e) = self
            .kv
            .hash_put(
                &format!("fusion:latest_close:{}", candle.symbol),
                &close_fields,
                LATEST_CLOSE_TTL_SEC,
            )
            .await
        {
            debug!("Latest-close cache write failed for {}: {}", candle.symbol, e);
        }

        let pct = change_pct(candle.open, candle.close);
        if pct.abs() < self.config.join_threshold_pct {
            return None;
        }

        // A degraded store reads as empty evidence; the move still matters.
        let news = self
            .buffer
            .recent_news_at(&candle.symbol, self.config.news_lookback_sec, now_unix)
            .await;
        let social = self
            .buffer
            .recent_social_at(&candle.symbol, self.config.social_lookback_sec, now_unix)
            .await;

        let severity = compute_severity(pct, news.len(), social.len());
        let direction = Direction::from_change_pct(pct);

        let fused = FusedEvent {
            event_kind: KIND_FUSED_EVENT.to_string(),
            symbol: candle.symbol.clone(),
            minute_bucket_ms: candle.minute_bucket_ms,
            price: FusedPrice {
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
                change_pct: (pct * 1000.0).round() / 1000.0,
            },
            news: news.into_iter().take(EVIDENCE_ITEMS_PER_SIDE).collect(),
            social: social.into_iter().take(EVIDENCE_ITEMS_PER_SIDE).collect(),
            severity,
            direction,
            fused_at: Utc::now(),
        };

        info!(
            "Fused {}: {:+.2}%, severity={}, news={}, social={}",
            fused.symbol,
            pct,
            severity,
            fused.news.len(),
            fused.social.len()
        );

        match serde_json::to_value(&fused) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(TOPIC_EVENTS_NORMALIZED, payload).await {
                    // The next finalized candle will carry fresh context.
                    warn!("Fused event publish failed for {}: {}", fused.symbol, e);
                }
            }
            Err(e) => warn!("Fused event not serializable: {}", e),
        }

        Some(fused)
    }

    /// Consume from in-process subscriptions until they close.
    pub async fn run(&self, mut rx: broadcast::Receiver<Value>) {
        loop {
            match rx.recv().await {
                Ok(payload) => self.handle_payload(&payload).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Fusion engine lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::RecordingBus;
    use crate::infrastructure::kv::InMemoryKvStore;
    use chrono::Utc;

    fn candle(symbol: &str, open: f64, close: f64) -> Candle1mEvent {
        Candle1mEvent {
            event_kind: KIND_CANDLE_1M.to_string(),
            symbol: symbol.to_string(),
            minute_bucket_ms: 1_700_000_040_000,
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume: 1000.0,
            finalized_at: Utc::now(),
        }
    }

    fn news_raw(headline: &str, related: &str) -> NewsRawEvent {
        NewsRawEvent {
            event_type: "news".to_string(),
            headline: headline.to_string(),
            url: format!("https://example.com/{}", headline.len()),
            source: "finnhub".to_string(),
            summary: String::new(),
            ingested_at_iso: Utc::now().to_rfc3339(),
            provider_symbol_list: related.to_string(),
            provider_category: String::new(),
        }
    }

    fn engine(kv: Arc<InMemoryKvStore>, bus: Arc<RecordingBus>) -> FusionEngine {
        FusionEngine::new(kv, bus, FusionConfig::default())
    }

    #[tokio::test]
    async fn small_move_is_dropped() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus.clone());

        let fused = engine.on_candle(&candle("AAPL", 100.0, 100.1)).await;
        assert!(fused.is_none());
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn zero_open_never_fuses() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus);

        assert!(engine.on_candle(&candle("AAPL", 0.0, 500.0)).await.is_none());
    }

    #[tokio::test]
    async fn move_at_threshold_fuses() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus.clone());

        let fused = engine.on_candle(&candle("AAPL", 100.0, 100.25)).await.unwrap();
        assert_eq!(fused.direction, Direction::Positive);
        assert_eq!(bus.published_on(TOPIC_EVENTS_NORMALIZED).await.len(), 1);
    }

    #[tokio::test]
    async fn fusion_with_two_news_items() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus.clone());

        engine.on_news(&news_raw("NVDA beats estimates", "NVDA")).await;
        engine.on_news(&news_raw("NVDA raises guidance", "NVDA")).await;

        let fused = engine.on_candle(&candle("NVDA", 100.0, 101.2)).await.unwrap();
        assert_eq!(fused.news.len(), 2);
        assert_eq!(fused.direction, Direction::Positive);
        // round(15 * 1.2) + min(50, 8 * 2) = 18 + 16
        assert_eq!(fused.severity, 34);

        let payload = &bus.published_on(TOPIC_EVENTS_NORMALIZED).await[0];
        assert_eq!(payload["event_kind"], "fused_event");
        assert_eq!(payload["severity"], 34);
    }

    #[tokio::test]
    async fn third_news_item_crosses_alert_floor() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus);

        for i in 0..3 {
            engine.on_news(&news_raw(&format!("NVDA update {i}"), "NVDA")).await;
        }

        let fused = engine.on_candle(&candle("NVDA", 100.0, 101.2)).await.unwrap();
        assert_eq!(fused.severity, 42);
    }

    #[tokio::test]
    async fn negative_move_fuses_negative() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus);

        let fused = engine.on_candle(&candle("TSLA", 200.0, 196.0)).await.unwrap();
        assert_eq!(fused.direction, Direction::Negative);
    }

    #[tokio::test]
    async fn headline_extraction_when_no_provider_list() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus);

        engine.on_news(&news_raw("AMD unveils new accelerator", "")).await;

        let fused = engine.on_candle(&candle("AMD", 100.0, 101.0)).await.unwrap();
        assert_eq!(fused.news.len(), 1);
    }

    #[tokio::test]
    async fn watchlist_suppresses_unlisted_symbols() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let config = FusionConfig {
            watchlist: symbols::parse_watchlist("NVDA"),
            ..FusionConfig::default()
        };
        let engine = FusionEngine::new(kv, bus, config);

        engine.on_news(&news_raw("CEO shakeup at MegaCorp", "MEGA")).await;
        engine.on_news(&news_raw("NVDA supply update", "NVDA")).await;

        let fused = engine.on_candle(&candle("NVDA", 100.0, 101.0)).await.unwrap();
        assert_eq!(fused.news.len(), 1);
        let none = engine.on_candle(&candle("MEGA", 100.0, 100.1)).await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn evidence_lists_cap_at_five() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus);

        for i in 0..8 {
            engine.on_news(&news_raw(&format!("NVDA item {i}"), "NVDA")).await;
        }

        let fused = engine.on_candle(&candle("NVDA", 100.0, 102.0)).await.unwrap();
        assert_eq!(fused.news.len(), 5);
        // Severity still counts the full window, capped at 50.
        // round(15*2) + min(50, 8*8) = 30 + 50
        assert_eq!(fused.severity, 80);
    }

    #[tokio::test]
    async fn latest_close_is_cached() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv.clone(), bus);

        // Below threshold: no fused event, but the close is cached anyway.
        engine.on_candle(&candle("AAPL", 100.0, 100.1)).await;
        let cached = kv.hash_get_all("fusion:latest_close:AAPL").await.unwrap().unwrap();
        assert_eq!(cached["close"], "100.1");
    }

    #[tokio::test]
    async fn degraded_store_still_reports_the_move() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv.clone(), bus.clone());

        kv.set_failing(true);
        let fused = engine.on_candle(&candle("AAPL", 100.0, 102.0)).await.unwrap();
        assert_eq!(fused.news.len(), 0);
        assert_eq!(fused.severity, 30);
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus.clone());

        bus.set_failing(true);
        let fused = engine.on_candle(&candle("AAPL", 100.0, 102.0)).await;
        assert!(fused.is_some());
    }

    #[tokio::test]
    async fn payload_dispatch_covers_all_kinds() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let engine = engine(kv, bus.clone());

        let news = serde_json::to_value(news_raw("TSLA deliveries jump", "TSLA")).unwrap();
        engine.handle_payload(&news).await;

        let social = serde_json::json!({
            "event_type": "social",
            "title": "TSLA to the moon",
            "platform": "reddit",
            "ingested_at_iso": Utc::now().to_rfc3339(),
        });
        engine.handle_payload(&social).await;

        let candle_payload = serde_json::to_value(candle("TSLA", 100.0, 101.2)).unwrap();
        engine.handle_payload(&candle_payload).await;

        let fused = &bus.published_on(TOPIC_EVENTS_NORMALIZED).await[0];
        assert_eq!(fused["news"].as_array().unwrap().len(), 1);
        assert_eq!(fused["social"].as_array().unwrap().len(), 1);
        // 18 + 8 + 5
        assert_eq!(fused["severity"], 31);
    }
}
