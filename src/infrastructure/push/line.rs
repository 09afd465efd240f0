use crate::domain::ports::PushChannel;
use crate::infrastructure::http_client::HttpClientFactory;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

const SEND_TIMEOUT_SECS: u64 = 10;

/// LINE Messaging API push channel.
///
/// LINE has no HTML rendering, so the alert markup is stripped before send.
pub struct LineChannel {
    client: Client,
    push_url: String,
    channel_token: String,
    to: String,
}

impl LineChannel {
    pub fn new(channel_token: &str, to: &str) -> Self {
        Self::with_push_url("https://api.line.me/v2/bot/message/push", channel_token, to)
    }

    pub fn with_push_url(push_url: &str, channel_token: &str, to: &str) -> Self {
        Self {
            client: HttpClientFactory::timed(SEND_TIMEOUT_SECS),
            push_url: push_url.to_string(),
            channel_token: channel_token.to_string(),
            to: to.to_string(),
        }
    }
}

/// Remove the HTML tags the Telegram formatter uses.
pub fn strip_markup(text: &str) -> String {
    text.replace("<b>", "")
        .replace("</b>", "")
        .replace("<i>", "")
        .replace("</i>", "")
}

#[async_trait]
impl PushChannel for LineChannel {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn send(&self, text: &str) -> bool {
        if self.channel_token.is_empty() || self.to.is_empty() {
            debug!("LINE not configured, skipping");
            return false;
        }

        let payload = json!({
            "to": self.to,
            "messages": [{"type": "text", "text": strip_markup(text)}],
        });

        let result = self
            .client
            .post(&self.push_url)
            .bearer_auth(&self.channel_token)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                info!("LINE message sent to {}", self.to);
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!("LINE API error {}: {}", status, body);
                false
            }
            Err(e) => {
                error!("LINE send failed: {}", e);
                false
            }
        }
    }
}
