use crate::domain::ports::PushChannel;
use crate::infrastructure::http_client::HttpClientFactory;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

const SEND_TIMEOUT_SECS: u64 = 10;

/// Telegram Bot API push channel.
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self::with_api_base("https://api.telegram.org", bot_token, chat_id)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: HttpClientFactory::timed(SEND_TIMEOUT_SECS),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// Send to an explicit chat, used by the command bot for replies.
    pub async fn send_to(&self, chat_id: &str, text: &str) -> bool {
        if self.bot_token.is_empty() || chat_id.is_empty() {
            debug!("Telegram not configured, skipping");
            return false;
        }

        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
            "parse_mode": "HTML",
        });

        match self.client.post(self.endpoint()).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Telegram message sent to {}", chat_id);
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!("Telegram API error {}: {}", status, body);
                false
            }
            Err(e) => {
                error!("Telegram send failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl PushChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> bool {
        self.send_to(&self.chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_channel_reports_failure() {
        let channel = TelegramChannel::new("", "");
        assert!(!channel.send("hello").await);
    }

    #[tokio::test]
    async fn missing_chat_id_reports_failure() {
        let channel = TelegramChannel::new("123:token", "");
        assert!(!channel.send("hello").await);
    }
}
