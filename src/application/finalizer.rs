use crate::domain::candle::{CANDLE_KEY_PREFIX, FinalizedCandle, OpenCandle, minute_bucket_ms, parse_candle_key};
use crate::domain::events::{Candle1mEvent, TOPIC_EVENTS_NORMALIZED};
use crate::domain::ports::{EventBus, KvStore};
use crate::domain::repositories::CandleRepository;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one finalization pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FlushReport {
    pub flushed: usize,
    pub errors: usize,
}

/// Detects minutes that will no longer receive trades and emits them once.
///
/// Per candle the order is fixed: table upsert, bus publish, key delete.
/// An upsert failure leaves the key for the next tick; a publish failure
/// after a successful upsert still deletes the key, since the table row is
/// the canonical record and the bus copy is best-effort.
pub struct CandleFinalizer {
    kv: Arc<dyn KvStore>,
    repository: Arc<dyn CandleRepository>,
    bus: Arc<dyn EventBus>,
    finalize_grace_sec: u64,
}

impl CandleFinalizer {
    pub fn new(
        kv: Arc<dyn KvStore>,
        repository: Arc<dyn CandleRepository>,
        bus: Arc<dyn EventBus>,
        finalize_grace_sec: u64,
    ) -> Self {
        Self {
            kv,
            repository,
            bus,
            finalize_grace_sec,
        }
    }

    pub async fn flush(&self) -> FlushReport {
        self.flush_at(Utc::now().timestamp_millis()).await
    }

    pub async fn flush_at(&self, now_ms: i64) -> FlushReport {
        let current_minute = minute_bucket_ms(now_ms);
        let stale_threshold = current_minute - self.finalize_grace_sec as i64 * 1000;

        let mut report = FlushReport::default();

        let keys = match self.kv.scan_keys(CANDLE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Open-candle scan failed, skipping pass: {}", e);
                return report;
            }
        };

        for key in keys {
            let Some((symbol, minute)) = parse_candle_key(&key) else {
                continue;
            };

            // The live minute is still aggregating.
            if minute >= current_minute {
                continue;
            }

            let fields = match self.kv.hash_get_all(&key).await {
                Ok(Some(fields)) => fields,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Candle read failed for {}: {}", key, e);
                    report.errors += 1;
                    continue;
                }
            };

            // Might still receive late trades.
            let last_update_ms = fields
                .get("last_update_ms")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v as i64)
                .unwrap_or(0);
            if last_update_ms > stale_threshold {
                continue;
            }

            let Some(open) = OpenCandle::from_hash(&symbol, minute, &fields) else {
                warn!("Invalid candle data for {}, discarding", key);
                let _ = self.kv.delete(&key).await;
                report.errors += 1;
                continue;
            };

            let candle = FinalizedCandle::from_open(&open, Utc::now());

            if let Err(e) = self.repository.upsert(&candle).await {
                // Key stays in place; the next tick retries.
                error!("Candle upsert failed for {}: {}", symbol, e);
                report.errors += 1;
                continue;
            }

            let event = Candle1mEvent::from_candle(&candle);
            match serde_json::to_value(&event) {
                Ok(payload) => {
                    if let Err(e) = self.bus.publish(TOPIC_EVENTS_NORMALIZED, payload).await {
                        error!("Candle publish failed for {}: {}", symbol, e);
                    }
                }
                Err(e) => error!("Candle event not serializable: {}", e),
            }

            if let Err(e) = self.kv.delete(&key).await {
                warn!("Open-candle delete failed for {}: {}", key, e);
            }
            report.flushed += 1;
        }

        info!(
            "Flush complete: {} candles finalized, {} errors",
            report.flushed, report.errors
        );
        report
    }

    /// Periodic finalization until shutdown.
    pub async fn run(&self, interval_sec: u64) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_sec));
        loop {
            ticker.tick().await;
            self.flush().await;
        }
    }
}
