use crate::domain::ports::EventBus;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

const CHANNEL_CAPACITY: usize = 1024;

/// In-process topic bus backed by broadcast channels.
///
/// Subscribers that fall behind lose the oldest messages, which matches the
/// at-least-once / no-ordering contract of the external bus: consumers must
/// tolerate gaps and duplicates either way.
pub struct InProcessBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to a topic, creating its channel on first use.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscribers on a topic (for testing).
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InProcessBus {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
        }
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            // A send error only means nobody is listening right now.
            let _ = tx.send(payload);
        }
        Ok(())
    }
}

/// Test double that records everything published and can be made to fail.
pub struct RecordingBus {
    published: tokio::sync::Mutex<Vec<(String, Value)>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            published: tokio::sync::Mutex::new(Vec::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("bus publish failed");
        }
        self.published.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = InProcessBus::new();
        let mut rx1 = bus.subscribe("events.normalized").await;
        let mut rx2 = bus.subscribe("events.normalized").await;
        assert_eq!(bus.subscriber_count("events.normalized").await, 2);

        bus.publish("events.normalized", json!({"event_kind": "candle_1m"}))
            .await
            .unwrap();

        assert_eq!(rx1.recv().await.unwrap()["event_kind"], "candle_1m");
        assert_eq!(rx2.recv().await.unwrap()["event_kind"], "candle_1m");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InProcessBus::new();
        let mut trades = bus.subscribe("trades.raw").await;
        let _news = bus.subscribe("news.raw").await;

        bus.publish("news.raw", json!({"headline": "x"})).await.unwrap();
        bus.publish("trades.raw", json!({"symbol": "AAPL"})).await.unwrap();

        assert_eq!(trades.recv().await.unwrap()["symbol"], "AAPL");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = InProcessBus::new();
        bus.publish("trades.raw", json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_channels() {
        let bus = InProcessBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe("t").await;
        clone.publish("t", json!(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!(1));
    }
}
