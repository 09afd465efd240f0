use crate::domain::events::{NewsRawEvent, TOPIC_NEWS_RAW};
use crate::domain::ports::{EventBus, KvStore};
use crate::infrastructure::feeds::news_api::FinnhubNewsClient;
use crate::infrastructure::feeds::rss::RssFetcher;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const PROVIDER_ITEM_CAP: usize = 100;
const RSS_ITEM_CAP: usize = 200;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CollectReport {
    pub published: usize,
    pub skipped: usize,
}

/// Scheduled news sweep: provider market news plus RSS feeds, URL-deduped
/// through the KV store, published on the raw news topic.
pub struct NewsCollector {
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn EventBus>,
    provider: FinnhubNewsClient,
    rss: RssFetcher,
    rss_urls: Vec<String>,
    dedup_ttl_sec: u64,
}

fn seen_key(url: &str) -> String {
    format!("news:seen:{}", hex::encode(Sha256::digest(url.as_bytes())))
}

impl NewsCollector {
    pub fn new(
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn EventBus>,
        provider: FinnhubNewsClient,
        rss_urls: Vec<String>,
        dedup_ttl_sec: u64,
    ) -> Self {
        Self {
            kv,
            bus,
            provider,
            rss: RssFetcher::new(),
            rss_urls,
            dedup_ttl_sec,
        }
    }

    pub async fn run_once(&self) -> CollectReport {
        let mut report = CollectReport::default();
        let ingested_at = Utc::now().to_rfc3339();

        match self.provider.fetch_market_news().await {
            Ok(items) => {
                info!("Got {} items from the news provider", items.len());
                for item in items.into_iter().take(PROVIDER_ITEM_CAP) {
                    if item.url.is_empty() {
                        continue;
                    }
                    if !self.newly_seen(&item.url).await {
                        report.skipped += 1;
                        continue;
                    }
                    let event = NewsRawEvent {
                        event_type: "news".to_string(),
                        headline: item.headline,
                        url: item.url,
                        source: "finnhub".to_string(),
                        summary: item.summary,
                        ingested_at_iso: ingested_at.clone(),
                        provider_symbol_list: item.related,
                        provider_category: item.category,
                    };
                    self.publish(&event, &mut report).await;
                }
            }
            Err(e) => warn!("Provider news fetch failed: {}", e),
        }

        let rss_items = self.rss.fetch_all(&self.rss_urls).await;
        for item in rss_items.into_iter().take(RSS_ITEM_CAP) {
            if item.url.is_empty() {
                continue;
            }
            if !self.newly_seen(&item.url).await {
                report.skipped += 1;
                continue;
            }
            let event = NewsRawEvent {
                event_type: "news".to_string(),
                headline: item.headline,
                url: item.url,
                source: item.source_name,
                summary: item.summary,
                ingested_at_iso: ingested_at.clone(),
                provider_symbol_list: String::new(),
                provider_category: "rss".to_string(),
            };
            self.publish(&event, &mut report).await;
        }

        info!(
            "News collection complete: {} published, {} skipped",
            report.published, report.skipped
        );
        report
    }

    /// Mark a URL as seen; a degraded store lets the item through rather
    /// than dropping news on the floor.
    async fn newly_seen(&self, url: &str) -> bool {
        match self
            .kv
            .set_if_absent(&seen_key(url), "1", self.dedup_ttl_sec)
            .await
        {
            Ok(newly_marked) => newly_marked,
            Err(e) => {
                warn!("News dedup unavailable: {}", e);
                true
            }
        }
    }

    async fn publish(&self, event: &NewsRawEvent, report: &mut CollectReport) {
        match serde_json::to_value(event) {
            Ok(payload) => match self.bus.publish(TOPIC_NEWS_RAW, payload).await {
                Ok(()) => report.published += 1,
                Err(e) => warn!("News publish failed: {}", e),
            },
            Err(e) => warn!("News event not serializable: {}", e),
        }
    }

    /// Scheduled sweep until shutdown. Interval zero disables the schedule
    /// (collection then only runs via the control endpoint).
    pub async fn run(&self, interval_sec: u64) {
        if interval_sec == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_sec));
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::RecordingBus;
    use crate::infrastructure::kv::InMemoryKvStore;

    fn collector(kv: Arc<InMemoryKvStore>, bus: Arc<RecordingBus>) -> NewsCollector {
        NewsCollector::new(
            kv,
            bus,
            FinnhubNewsClient::new(""), // unconfigured: provider yields nothing
            Vec::new(),
            86_400,
        )
    }

    #[tokio::test]
    async fn dedup_marks_urls_once() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let c = collector(kv, bus);

        assert!(c.newly_seen("https://example.com/a").await);
        assert!(!c.newly_seen("https://example.com/a").await);
        assert!(c.newly_seen("https://example.com/b").await);
    }

    #[tokio::test]
    async fn degraded_store_lets_items_through() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.set_failing(true);
        let bus = Arc::new(RecordingBus::new());
        let c = collector(kv, bus);

        assert!(c.newly_seen("https://example.com/a").await);
        assert!(c.newly_seen("https://example.com/a").await);
    }

    #[tokio::test]
    async fn empty_run_reports_zeroes() {
        let kv = Arc::new(InMemoryKvStore::new());
        let bus = Arc::new(RecordingBus::new());
        let c = collector(kv, bus.clone());

        let report = c.run_once().await;
        assert_eq!(report.published, 0);
        assert_eq!(report.skipped, 0);
        assert!(bus.published().await.is_empty());
    }

    #[test]
    fn seen_keys_are_stable_and_distinct() {
        assert_eq!(seen_key("https://a"), seen_key("https://a"));
        assert_ne!(seen_key("https://a"), seen_key("https://b"));
        assert!(seen_key("https://a").starts_with("news:seen:"));
    }
}
