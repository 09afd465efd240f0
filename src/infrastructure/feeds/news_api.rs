use crate::infrastructure::http_client::HttpClientFactory;
use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::warn;

const NEWS_TIMEOUT_SECS: u64 = 15;

/// One article from the provider's market-news endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderNewsItem {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: String,
    /// Comma-separated ticker list, when the provider attributes one.
    #[serde(default)]
    pub related: String,
    #[serde(default)]
    pub datetime: i64,
}

/// Finnhub market-news REST client.
pub struct FinnhubNewsClient {
    client: ClientWithMiddleware,
    api_base: String,
    api_key: String,
}

impl FinnhubNewsClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_api_base("https://finnhub.io/api/v1", api_key)
    }

    pub fn with_api_base(api_base: &str, api_key: &str) -> Self {
        Self {
            client: HttpClientFactory::retrying(NEWS_TIMEOUT_SECS),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch general market news. Unconfigured clients return nothing.
    pub async fn fetch_market_news(&self) -> Result<Vec<ProviderNewsItem>> {
        if self.api_key.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/news?category=general&token={}",
            self.api_base, self.api_key
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("News fetch failed")?;

        if !resp.status().is_success() {
            warn!("News API returned {}", resp.status());
            return Ok(Vec::new());
        }

        resp.json::<Vec<ProviderNewsItem>>()
            .await
            .context("News response was not the expected JSON list")
    }
}
