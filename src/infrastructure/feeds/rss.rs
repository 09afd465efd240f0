use crate::infrastructure::http_client::HttpClientFactory;
use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use rss::Channel;
use std::io::Cursor;
use tracing::{info, warn};

const RSS_TIMEOUT_SECS: u64 = 15;
const ITEMS_PER_FEED: usize = 50;

/// A raw article pulled from an RSS feed.
#[derive(Debug, Clone)]
pub struct RssItem {
    pub source_name: String,
    pub feed_url: String,
    pub url: String,
    pub headline: String,
    pub summary: String,
    pub published: String,
}

pub struct RssFetcher {
    client: ClientWithMiddleware,
}

impl RssFetcher {
    pub fn new() -> Self {
        Self {
            client: HttpClientFactory::retrying(RSS_TIMEOUT_SECS),
        }
    }

    /// Fetch and parse every configured feed, skipping ones that fail.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<RssItem> {
        let mut items = Vec::new();
        for url in urls {
            match self.fetch_feed(url).await {
                Ok(mut feed_items) => items.append(&mut feed_items),
                Err(e) => warn!("RSS fetch failed for {}: {}", url, e),
            }
        }
        info!("Parsed {} RSS items from {} feeds", items.len(), urls.len());
        items
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<RssItem>> {
        let resp = self.client.get(url).send().await.context("Feed request failed")?;
        let bytes = resp.bytes().await.context("Failed to read feed body")?;
        let channel = Channel::read_from(Cursor::new(bytes)).context("Failed to parse feed")?;

        let source_name: String = channel.title().chars().take(50).collect();

        Ok(channel
            .items()
            .iter()
            .take(ITEMS_PER_FEED)
            .filter_map(|item| {
                let link = item.link()?.to_string();
                Some(RssItem {
                    source_name: source_name.clone(),
                    feed_url: url.to_string(),
                    url: link,
                    headline: item.title().unwrap_or("").to_string(),
                    summary: item.description().unwrap_or("").to_string(),
                    published: item.pub_date().unwrap_or("").to_string(),
                })
            })
            .collect())
    }
}

impl Default for RssFetcher {
    fn default() -> Self {
        Self::new()
    }
}
