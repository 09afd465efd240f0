use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;

/// Runtime configuration, loaded from the environment at boot.
///
/// Parse failures and missing required values fail hard here; nothing is
/// allowed to lazy-fail under load.
#[derive(Debug, Clone)]
pub struct Config {
    // Shared state
    pub redis_url: String,
    pub database_url: String,
    pub listen_addr: String,

    // Trade feed
    pub feed_ws_url: String,
    pub feed_token: String,
    pub symbols: Vec<String>,
    pub ping_interval_sec: u64,
    pub reconnect_min_delay_sec: f64,
    pub reconnect_max_delay_sec: f64,

    // Candle lifecycle
    pub candle_ttl_sec: u64,
    pub finalize_grace_sec: u64,
    pub finalize_interval_sec: u64,

    // Fusion
    pub join_threshold_pct: f64,
    pub news_lookback_sec: u64,
    pub social_lookback_sec: u64,
    pub evidence_retention_sec: u64,
    pub watch_symbols: String,

    // Alerting
    pub candle_alert_threshold_pct: f64,
    pub candle_cooldown_sec: u64,
    pub fused_cooldown_sec: u64,
    pub fused_alert_severity_min: u8,

    // News collection
    pub news_api_key: String,
    pub rss_urls: Vec<String>,
    pub news_poll_interval_sec: u64,
    pub news_dedup_ttl_sec: u64,

    // Analysis
    pub analysis_news_lookback_sec: u64,
    pub analysis_social_lookback_sec: u64,
    pub oracle_api_key: String,
    pub oracle_model: String,

    // Push channels & bot
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub line_channel_access_token: String,
    pub line_to: String,
    pub telegram_webhook_secret: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .parse::<T>()
        .with_context(|| format!("Failed to parse {}", name))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let symbols: Vec<String> = var_or("STREAM_SYMBOLS", "AAPL")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let rss_urls: Vec<String> = var_or("RSS_URLS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            database_url: var_or("DATABASE_URL", "sqlite://data/marketfuse.db"),
            listen_addr: var_or("LISTEN_ADDR", "0.0.0.0:8080"),

            feed_ws_url: var_or("FEED_WS_URL", "wss://ws.finnhub.io"),
            feed_token: var_or("FEED_TOKEN", ""),
            symbols,
            ping_interval_sec: parse_var("PING_INTERVAL_SEC", "20")?,
            reconnect_min_delay_sec: parse_var("RECONNECT_MIN_DELAY_SEC", "1.0")?,
            reconnect_max_delay_sec: parse_var("RECONNECT_MAX_DELAY_SEC", "60.0")?,

            candle_ttl_sec: parse_var("CANDLE_TTL_SEC", "10800")?,
            finalize_grace_sec: parse_var("FINALIZE_GRACE_SEC", "120")?,
            finalize_interval_sec: parse_var("FINALIZE_INTERVAL_SEC", "30")?,

            join_threshold_pct: parse_var("JOIN_THRESHOLD_PCT", "0.25")?,
            news_lookback_sec: parse_var("NEWS_LOOKBACK_SEC", "1800")?,
            social_lookback_sec: parse_var("SOCIAL_LOOKBACK_SEC", "3600")?,
            evidence_retention_sec: parse_var("EVIDENCE_RETENTION_SEC", "7200")?,
            watch_symbols: var_or("WATCH_SYMBOLS", ""),

            candle_alert_threshold_pct: parse_var("CANDLE_ALERT_THRESHOLD_PCT", "0.9")?,
            candle_cooldown_sec: parse_var("CANDLE_COOLDOWN_SEC", "180")?,
            fused_cooldown_sec: parse_var("FUSED_COOLDOWN_SEC", "300")?,
            fused_alert_severity_min: parse_var("FUSED_ALERT_SEVERITY_MIN", "35")?,

            news_api_key: var_or("NEWS_API_KEY", ""),
            rss_urls,
            news_poll_interval_sec: parse_var("NEWS_POLL_INTERVAL_SEC", "60")?,
            news_dedup_ttl_sec: parse_var("NEWS_DEDUP_TTL_SEC", "86400")?,

            analysis_news_lookback_sec: parse_var("ANALYSIS_NEWS_LOOKBACK_SEC", "3600")?,
            analysis_social_lookback_sec: parse_var("ANALYSIS_SOCIAL_LOOKBACK_SEC", "3600")?,
            oracle_api_key: var_or("ORACLE_API_KEY", ""),
            oracle_model: var_or("ORACLE_MODEL", "gemini-1.5-pro"),

            telegram_bot_token: var_or("TELEGRAM_BOT_TOKEN", ""),
            telegram_chat_id: var_or("TELEGRAM_CHAT_ID", ""),
            line_channel_access_token: var_or("LINE_CHANNEL_ACCESS_TOKEN", ""),
            line_to: var_or("LINE_TO", ""),
            telegram_webhook_secret: var_or("TELEGRAM_WEBHOOK_SECRET", ""),
        })
    }

    /// Watchlist used to filter fusion fan-out. Empty means accept all.
    pub fn watchlist(&self) -> HashSet<String> {
        crate::domain::symbols::parse_watchlist(&self.watch_symbols)
    }

    /// The streamer cannot run without feed credentials; fail at boot, not
    /// under load.
    pub fn require_feed_credentials(&self) -> Result<()> {
        if self.feed_token.is_empty() {
            anyhow::bail!("Missing FEED_TOKEN (required to run the trade streamer)");
        }
        if self.symbols.is_empty() {
            anyhow::bail!("Missing STREAM_SYMBOLS (required to run the trade streamer)");
        }
        Ok(())
    }
}
