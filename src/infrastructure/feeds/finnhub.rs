//! Finnhub websocket trade feed.
//!
//! Wire format:
//!   {"type":"trade","data":[{"p":<price>,"s":"AAPL","t":<unix_ms>,"v":<volume>}, ...]}
//!
//! The feed pings every `ping_interval_sec`; two pings without a pong in
//! between force a reconnect (the caller owns the retry loop).

use crate::domain::errors::FeedError;
use crate::domain::events::TradeEvent;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const MAX_MISSED_PONGS: u32 = 2;

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<FeedTrade>,
}

#[derive(Debug, Deserialize)]
struct FeedTrade {
    #[serde(default)]
    s: String,
    #[serde(default)]
    p: f64,
    #[serde(default)]
    t: i64,
    #[serde(default)]
    v: f64,
}

pub struct FinnhubFeed {
    ws_base: String,
    token: String,
    symbols: Vec<String>,
    ping_interval_sec: u64,
}

impl FinnhubFeed {
    pub fn new(ws_base: &str, token: &str, symbols: Vec<String>, ping_interval_sec: u64) -> Self {
        Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            symbols,
            ping_interval_sec,
        }
    }

    fn ws_url(&self) -> String {
        format!("{}?token={}", self.ws_base, self.token)
    }

    /// Connect, subscribe, and forward trades until the connection dies.
    /// Returns Err for every termination cause so the caller can back off.
    pub async fn connect_and_stream(&self, tx: Sender<TradeEvent>) -> Result<()> {
        let url = self.ws_url();
        info!("Connecting to trade feed websocket");

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to trade feed")?;
        let (mut write, mut read) = ws_stream.split();

        for sym in &self.symbols {
            let frame = serde_json::json!({"type": "subscribe", "symbol": sym}).to_string();
            write
                .send(Message::Text(frame.into()))
                .await
                .context("Failed to send subscription")?;
        }
        info!("Subscribed to {} symbols", self.symbols.len());

        let mut ping_interval =
            tokio::time::interval(std::time::Duration::from_secs(self.ping_interval_sec));
        ping_interval.tick().await; // the first tick fires immediately
        let mut unanswered_pings: u32 = 0;

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if unanswered_pings >= MAX_MISSED_PONGS {
                        return Err(FeedError::HeartbeatMissed { missed: unanswered_pings }.into());
                    }
                    write.send(Message::Ping(vec![].into())).await.context("Ping failed")?;
                    unanswered_pings += 1;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for trade in parse_frame(&text) {
                                if tx.send(trade).await.is_err() {
                                    // Receiver gone, the service is shutting down.
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            unanswered_pings = 0;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Feed closed by server: {:?}", frame);
                            return Err(FeedError::ConnectionLost {
                                reason: "server closed connection".to_string(),
                            }
                            .into());
                        }
                        Some(Err(e)) => {
                            warn!("Feed read error: {}", e);
                            return Err(FeedError::ConnectionLost { reason: e.to_string() }.into());
                        }
                        None => {
                            return Err(FeedError::ConnectionLost {
                                reason: "stream ended".to_string(),
                            }
                            .into());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Parse one websocket text frame into trade events. Non-trade frames
/// (subscription acks, provider pings) and entries without a symbol yield
/// nothing.
fn parse_frame(text: &str) -> Vec<TradeEvent> {
    let envelope: FeedEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(_) => return Vec::new(),
    };
    if envelope.kind != "trade" {
        return Vec::new();
    }
    envelope
        .data
        .into_iter()
        .filter(|t| !t.s.trim().is_empty())
        .map(|t| TradeEvent::new(t.s.trim(), t.t, t.p, t.v, "finnhub"))
        .collect()
}
