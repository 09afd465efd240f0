use crate::domain::events::{HeartbeatEvent, TOPIC_TRADES_RAW, TradeEvent};
use crate::domain::ports::EventBus;
use crate::infrastructure::feeds::FinnhubFeed;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// A connection that survived this long resets the backoff sequence.
const STABLE_CONNECTION_SECS: u64 = 60;

/// Truncated exponential backoff with jitter:
/// `min(max, min · 2^(n−1)) + U(0, 0.25 · base)`, capped at `max`.
pub fn backoff_delay(attempt: u32, min_delay: f64, max_delay: f64) -> f64 {
    let exp = 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
    let base = (min_delay * exp).min(max_delay);
    let jitter = rand::rng().random_range(0.0..=(0.25 * base));
    (base + jitter).min(max_delay)
}

/// Long-running trade feed loop: forwards normalized trades onto the raw
/// trade topic and reconnects with jittered backoff when the feed dies.
pub struct TradeStreamer {
    feed: FinnhubFeed,
    bus: Arc<dyn EventBus>,
    reconnect_min_delay_sec: f64,
    reconnect_max_delay_sec: f64,
}

impl TradeStreamer {
    pub fn new(
        feed: FinnhubFeed,
        bus: Arc<dyn EventBus>,
        reconnect_min_delay_sec: f64,
        reconnect_max_delay_sec: f64,
    ) -> Self {
        Self {
            feed,
            bus,
            reconnect_min_delay_sec,
            reconnect_max_delay_sec,
        }
    }

    pub async fn run(&self) {
        let (tx, mut rx) = mpsc::channel::<TradeEvent>(1024);

        let bus = self.bus.clone();
        let forwarder = tokio::spawn(async move {
            let mut published: u64 = 0;
            while let Some(trade) = rx.recv().await {
                match serde_json::to_value(&trade) {
                    Ok(payload) => {
                        if let Err(e) = bus.publish(TOPIC_TRADES_RAW, payload).await {
                            warn!("Trade publish failed for {}: {}", trade.symbol, e);
                        } else {
                            published += 1;
                            if published % 1000 == 0 {
                                info!("Published {} trade events", published);
                            }
                        }
                    }
                    Err(e) => warn!("Trade not serializable: {}", e),
                }
            }
        });

        let mut attempt: u32 = 0;
        loop {
            let connected_at = Instant::now();
            match self.feed.connect_and_stream(tx.clone()).await {
                Ok(()) => break, // receiver dropped, shutting down
                Err(e) => {
                    if connected_at.elapsed().as_secs() >= STABLE_CONNECTION_SECS {
                        attempt = 0;
                    }
                    attempt += 1;
                    let delay = backoff_delay(
                        attempt,
                        self.reconnect_min_delay_sec,
                        self.reconnect_max_delay_sec,
                    );
                    error!("Trade feed error, reconnecting in {:.1}s: {}", delay, e);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
        drop(tx);
        let _ = forwarder.await;
    }

    /// Periodic liveness marker on the trade topic; the aggregator ignores it.
    pub async fn run_heartbeat(bus: Arc<dyn EventBus>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let hb = HeartbeatEvent::new("market streamer alive");
            match serde_json::to_value(&hb) {
                Ok(payload) => {
                    if let Err(e) = bus.publish(TOPIC_TRADES_RAW, payload).await {
                        warn!("Heartbeat publish failed: {}", e);
                    }
                }
                Err(e) => warn!("Heartbeat not serializable: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_truncates() {
        for _ in 0..50 {
            let d1 = backoff_delay(1, 1.0, 60.0);
            assert!((1.0..=1.25).contains(&d1), "attempt 1 out of band: {d1}");

            let d3 = backoff_delay(3, 1.0, 60.0);
            assert!((4.0..=5.0).contains(&d3), "attempt 3 out of band: {d3}");

            let d20 = backoff_delay(20, 1.0, 60.0);
            assert!(d20 <= 60.0, "delay must truncate at max: {d20}");
            assert!(d20 >= 60.0 - f64::EPSILON);
        }
    }

    #[test]
    fn backoff_respects_min_delay() {
        let d = backoff_delay(1, 2.5, 60.0);
        assert!(d >= 2.5);
    }
}
