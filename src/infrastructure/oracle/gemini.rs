use crate::domain::ports::ReasoningOracle;
use crate::infrastructure::http_client::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::error;

const ORACLE_TIMEOUT_SECS: u64 = 30;

/// Reasoning oracle over the Generative Language REST API.
pub struct GeminiOracle {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiOracle {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_api_base(
            "https://generativelanguage.googleapis.com/v1beta",
            api_key,
            model,
        )
    }

    pub fn with_api_base(api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: HttpClientFactory::timed(ORACLE_TIMEOUT_SECS),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ReasoningOracle for GeminiOracle {
    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn reason(&self, contract: &str, context: Value) -> Result<Value> {
        let payload = json!({
            "contents": [
                {"role": "user", "parts": [{"text": format!("{}\n\nDATA(JSON): {}", contract, context)}]}
            ],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json",
            },
        });

        let resp = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .context("Oracle request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            error!("Oracle API error {}: {}", status, preview);
            anyhow::bail!("oracle returned status {}", status);
        }

        let body: Value = resp.json().await.context("Oracle response was not JSON")?;

        // Answer text lives at candidates[0].content.parts[0].text
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .context("Oracle response missing answer text")?;

        serde_json::from_str(text).context("Oracle answer text was not valid JSON")
    }
}
