use crate::domain::evidence::{EVIDENCE_CAP, EvidenceKind, NewsEvidence, SocialEvidence};
use crate::domain::ports::KvStore;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// Per-symbol, time-windowed, bounded FIFO of news and social evidence.
///
/// Writes are best-effort: a degraded KV store must never stall ingestion,
/// so `append` swallows store errors and `recent` degrades to empty.
pub struct EvidenceBuffer {
    kv: Arc<dyn KvStore>,
}

pub fn evidence_key(kind: EvidenceKind, symbol: &str) -> String {
    format!("fusion:{}:{}", kind.as_str(), symbol)
}

impl EvidenceBuffer {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn append_news(&self, symbol: &str, item: &NewsEvidence, retention_sec: u64) {
        self.append(EvidenceKind::News, symbol, item, retention_sec).await;
    }

    pub async fn append_social(&self, symbol: &str, item: &SocialEvidence, retention_sec: u64) {
        self.append(EvidenceKind::Social, symbol, item, retention_sec).await;
    }

    pub async fn recent_news(&self, symbol: &str, lookback_sec: u64) -> Vec<NewsEvidence> {
        self.recent_news_at(symbol, lookback_sec, Utc::now().timestamp()).await
    }

    pub async fn recent_social(&self, symbol: &str, lookback_sec: u64) -> Vec<SocialEvidence> {
        self.recent_social_at(symbol, lookback_sec, Utc::now().timestamp()).await
    }

    pub async fn recent_news_at(&self, symbol: &str, lookback_sec: u64, now_unix: i64) -> Vec<NewsEvidence> {
        self.recent::<NewsEvidence>(EvidenceKind::News, symbol, lookback_sec, now_unix, |n| {
            n.ingested_at_unix
        })
        .await
    }

    pub async fn recent_social_at(&self, symbol: &str, lookback_sec: u64, now_unix: i64) -> Vec<SocialEvidence> {
        self.recent::<SocialEvidence>(EvidenceKind::Social, symbol, lookback_sec, now_unix, |s| {
            s.ingested_at_unix
        })
        .await
    }

    async fn append<T: Serialize>(&self, kind: EvidenceKind, symbol: &str, item: &T, retention_sec: u64) {
        let key = evidence_key(kind, symbol);
        let payload = match serde_json::to_string(item) {
            Ok(p) => p,
            Err(e) => {
                warn!("Evidence for {} not serializable: {}", symbol, e);
                return;
            }
        };
        if let Err(e) = self
            .kv
            .list_prepend_trim(&key, &payload, EVIDENCE_CAP, retention_sec)
            .await
        {
            warn!("Evidence append for {} dropped: {}", symbol, e);
        }
    }

    async fn recent<T: DeserializeOwned>(
        &self,
        kind: EvidenceKind,
        symbol: &str,
        lookback_sec: u64,
        now_unix: i64,
        ts_of: fn(&T) -> i64,
    ) -> Vec<T> {
        let key = evidence_key(kind, symbol);
        let raw = match self.kv.list_range(&key, EVIDENCE_CAP).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Evidence read for {} failed, treating as empty: {}", symbol, e);
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|s| serde_json::from_str::<T>(s).ok())
            .filter(|item| {
                let ts = ts_of(item);
                ts > 0 && now_unix - ts <= lookback_sec as i64
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv::InMemoryKvStore;

    fn news(headline: &str, ts: i64) -> NewsEvidence {
        NewsEvidence::new(headline, "https://example.com/a", "rss", "", ts)
    }

    #[tokio::test]
    async fn recent_is_newest_first_within_lookback() {
        let kv = Arc::new(InMemoryKvStore::new());
        let buf = EvidenceBuffer::new(kv);
        let now = 1_700_000_000;

        buf.append_news("NVDA", &news("old", now - 4000), 7200).await;
        buf.append_news("NVDA", &news("recent", now - 600), 7200).await;
        buf.append_news("NVDA", &news("fresh", now - 10), 7200).await;

        let items = buf.recent_news_at("NVDA", 1800, now).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].headline, "fresh");
        assert_eq!(items[1].headline, "recent");
    }

    #[tokio::test]
    async fn buffer_never_exceeds_cap() {
        let kv = Arc::new(InMemoryKvStore::new());
        let buf = EvidenceBuffer::new(kv.clone());
        let now = 1_700_000_000;

        for i in 0..80 {
            buf.append_news("AAPL", &news(&format!("h{i}"), now), 7200).await;
        }

        let raw = kv.list_range(&evidence_key(EvidenceKind::News, "AAPL"), 200).await.unwrap();
        assert_eq!(raw.len(), 50);

        let items = buf.recent_news_at("AAPL", 3600, now).await;
        assert_eq!(items.len(), 50);
        assert_eq!(items[0].headline, "h79");
    }

    #[tokio::test]
    async fn items_without_timestamp_are_ignored_on_read() {
        let kv = Arc::new(InMemoryKvStore::new());
        let buf = EvidenceBuffer::new(kv);
        let now = 1_700_000_000;

        buf.append_news("TSLA", &news("no-ts", 0), 7200).await;
        assert!(buf.recent_news_at("TSLA", 3600, now).await.is_empty());
    }

    #[tokio::test]
    async fn kinds_do_not_mix() {
        let kv = Arc::new(InMemoryKvStore::new());
        let buf = EvidenceBuffer::new(kv);
        let now = 1_700_000_000;

        buf.append_news("AMD", &news("news item", now), 7200).await;
        let social = SocialEvidence {
            title: "social item".to_string(),
            platform: "reddit".to_string(),
            url: String::new(),
            engagement: serde_json::Map::new(),
            ingested_at_unix: now,
        };
        buf.append_social("AMD", &social, 7200).await;

        assert_eq!(buf.recent_news_at("AMD", 3600, now).await.len(), 1);
        assert_eq!(buf.recent_social_at("AMD", 3600, now).await.len(), 1);
    }

    #[tokio::test]
    async fn degraded_store_is_silent() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.set_failing(true);
        let buf = EvidenceBuffer::new(kv.clone());

        // Neither call may panic or error out.
        buf.append_news("NVDA", &news("x", 1), 7200).await;
        assert!(buf.recent_news_at("NVDA", 3600, 1).await.is_empty());

        // Store recovers; appends flow again.
        kv.set_failing(false);
        buf.append_news("NVDA", &news("y", 1_700_000_000), 7200).await;
        assert_eq!(buf.recent_news_at("NVDA", 3600, 1_700_000_000).await.len(), 1);
    }
}
