use crate::domain::candle::{candle_key, minute_bucket_ms};
use crate::domain::events::TradeEvent;
use crate::domain::ports::KvStore;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const WRITE_ATTEMPTS: u32 = 3;

/// Folds raw trades into per-minute open candles.
///
/// The aggregator keeps no candle state in memory: each trade becomes one
/// atomic scripted update against the KV store, which is what makes running
/// several instances against the same feed safe.
pub struct CandleAggregator {
    kv: Arc<dyn KvStore>,
    candle_ttl_sec: u64,
}

impl CandleAggregator {
    pub fn new(kv: Arc<dyn KvStore>, candle_ttl_sec: u64) -> Self {
        Self { kv, candle_ttl_sec }
    }

    /// Apply one trade. Trades without a timestamp are dropped; non-trade
    /// messages (heartbeats, acks) are ignored.
    pub async fn apply(&self, trade: &TradeEvent) -> Result<()> {
        if !trade.is_trade() {
            return Ok(());
        }
        if trade.timestamp_ms == 0 {
            debug!("Dropping trade without timestamp for {}", trade.symbol);
            return Ok(());
        }

        let bucket = minute_bucket_ms(trade.timestamp_ms);
        let key = candle_key(&trade.symbol, bucket);

        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self
                .kv
                .candle_upsert(&key, trade.price, trade.volume, trade.timestamp_ms, self.candle_ttl_sec)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Candle upsert attempt {}/{} failed for {}: {}",
                        attempt, WRITE_ATTEMPTS, trade.symbol, e
                    );
                    last_err = Some(e);
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt - 1))).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("candle upsert failed")))
    }

    /// Handle a raw bus payload. Malformed messages are logged and dropped so
    /// the bus does not redeliver them forever.
    pub async fn handle_payload(&self, payload: &Value) -> Result<()> {
        match serde_json::from_value::<TradeEvent>(payload.clone()) {
            Ok(trade) => self.apply(&trade).await,
            Err(e) => {
                if payload.get("event_type").and_then(Value::as_str) == Some("trade") {
                    warn!("Invalid trade event: {}", e);
                }
                Ok(())
            }
        }
    }

    /// Consume trades from an in-process subscription until it closes.
    pub async fn run(&self, mut rx: broadcast::Receiver<Value>) {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if let Err(e) = self.handle_payload(&payload).await {
                        warn!("Trade dropped after retries: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Aggregator lagged, skipped {} trades", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv::InMemoryKvStore;

    fn aggregator(kv: Arc<InMemoryKvStore>) -> CandleAggregator {
        CandleAggregator::new(kv, 10_800)
    }

    #[tokio::test]
    async fn single_trade_opens_a_candle() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        agg.apply(&TradeEvent::new("AAPL", 1_700_000_015_000, 150.0, 10.0, "feed"))
            .await
            .unwrap();

        let key = candle_key("AAPL", 1_699_999_980_000);
        let hash = kv.hash_get_all(&key).await.unwrap().unwrap();
        assert_eq!(hash["open"], "150");
        assert_eq!(hash["high"], "150");
        assert_eq!(hash["low"], "150");
        assert_eq!(hash["close"], "150");
        assert_eq!(hash["volume"], "10");
    }

    #[tokio::test]
    async fn three_trades_fold_into_one_minute() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        // 5s, 30s and 55s into the minute starting at 1_700_000_040_000.
        agg.apply(&TradeEvent::new("TSLA", 1_700_000_045_000, 200.0, 5.0, "feed")).await.unwrap();
        agg.apply(&TradeEvent::new("TSLA", 1_700_000_070_000, 210.0, 2.0, "feed")).await.unwrap();
        agg.apply(&TradeEvent::new("TSLA", 1_700_000_095_000, 205.0, 3.0, "feed")).await.unwrap();

        let key = candle_key("TSLA", 1_700_000_040_000);
        let hash = kv.hash_get_all(&key).await.unwrap().unwrap();
        assert_eq!(hash["open"], "200");
        assert_eq!(hash["high"], "210");
        assert_eq!(hash["low"], "200");
        assert_eq!(hash["close"], "205");
        assert_eq!(hash["volume"], "10");
        assert_eq!(hash["last_update_ms"], "1700000095000");
    }

    #[tokio::test]
    async fn trades_split_across_minute_buckets() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        agg.apply(&TradeEvent::new("NVDA", 59_000, 500.0, 1.0, "feed")).await.unwrap();
        agg.apply(&TradeEvent::new("NVDA", 61_000, 501.0, 1.0, "feed")).await.unwrap();

        assert!(kv.hash_get_all(&candle_key("NVDA", 0)).await.unwrap().is_some());
        assert!(kv.hash_get_all(&candle_key("NVDA", 60_000)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_timestamp_is_dropped() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        agg.apply(&TradeEvent::new("AAPL", 0, 150.0, 10.0, "feed")).await.unwrap();
        assert!(kv.scan_keys("candle:1m:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeats_are_ignored() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        let hb = serde_json::to_value(crate::domain::events::HeartbeatEvent::new("alive")).unwrap();
        agg.handle_payload(&hb).await.unwrap();
        assert!(kv.scan_keys("candle:1m:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_acked_and_dropped() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv);

        let payload = serde_json::json!({"event_type": "trade", "symbol": 42});
        assert!(agg.handle_payload(&payload).await.is_ok());
    }

    #[tokio::test]
    async fn zero_volume_updates_price_only() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        agg.apply(&TradeEvent::new("AMD", 5_000, 100.0, 4.0, "feed")).await.unwrap();
        agg.apply(&TradeEvent::new("AMD", 6_000, 95.0, 0.0, "feed")).await.unwrap();

        let hash = kv.hash_get_all(&candle_key("AMD", 0)).await.unwrap().unwrap();
        assert_eq!(hash["low"], "95");
        assert_eq!(hash["close"], "95");
        assert_eq!(hash["volume"], "4");
    }

    #[tokio::test]
    async fn duplicate_delivery_double_counts_volume_only() {
        let kv = Arc::new(InMemoryKvStore::new());
        let agg = aggregator(kv.clone());

        let trade = TradeEvent::new("AAPL", 5_000, 150.0, 10.0, "feed");
        agg.apply(&trade).await.unwrap();
        agg.apply(&trade).await.unwrap();

        // The feed treats re-emits as new fills, so volume sums; the price
        // fields stay idempotent.
        let hash = kv.hash_get_all(&candle_key("AAPL", 0)).await.unwrap().unwrap();
        assert_eq!(hash["open"], "150");
        assert_eq!(hash["high"], "150");
        assert_eq!(hash["close"], "150");
        assert_eq!(hash["volume"], "20");
        assert_eq!(hash["last_update_ms"], "5000");
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_after_retries() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.set_failing(true);
        let agg = aggregator(kv);

        let result = agg
            .apply(&TradeEvent::new("AAPL", 1_000, 1.0, 1.0, "feed"))
            .await;
        assert!(result.is_err());
    }
}
