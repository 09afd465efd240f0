use crate::domain::candle::change_pct;
use crate::domain::events::{Candle1mEvent, FusedEvent, KIND_CANDLE_1M, KIND_FUSED_EVENT};
use crate::domain::fusion::Direction;
use crate::domain::ports::{KvStore, PushChannel};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct AlertConfig {
    pub candle_threshold_pct: f64,
    pub fused_severity_min: u8,
    pub candle_cooldown_sec: u64,
    pub fused_cooldown_sec: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            candle_threshold_pct: 0.9,
            fused_severity_min: 35,
            candle_cooldown_sec: 180,
            fused_cooldown_sec: 300,
        }
    }
}

/// Turns selected normalized events into push notifications, throttled by a
/// per-(kind, symbol) cooldown so candle and fused alerts gate independently.
pub struct AlertGate {
    kv: Arc<dyn KvStore>,
    channels: Vec<Arc<dyn PushChannel>>,
    config: AlertConfig,
}

fn cooldown_key(kind: &str, symbol: &str) -> String {
    format!("alert:cooldown:{}:{}", kind, symbol)
}

impl AlertGate {
    pub fn new(kv: Arc<dyn KvStore>, channels: Vec<Arc<dyn PushChannel>>, config: AlertConfig) -> Self {
        Self { kv, channels, config }
    }

    pub async fn handle_payload(&self, payload: &Value) {
        match payload.get("event_kind").and_then(Value::as_str) {
            Some(KIND_CANDLE_1M) => match serde_json::from_value::<Candle1mEvent>(payload.clone()) {
                Ok(ev) => {
                    self.on_candle(&ev).await;
                }
                Err(e) => warn!("Invalid candle event: {}", e),
            },
            Some(KIND_FUSED_EVENT) => match serde_json::from_value::<FusedEvent>(payload.clone()) {
                Ok(ev) => {
                    self.on_fused(&ev).await;
                }
                Err(e) => warn!("Invalid fused event: {}", e),
            },
            _ => {}
        }
    }

    /// Candle alert path. Returns true when a notification went out.
    pub async fn on_candle(&self, ev: &Candle1mEvent) -> bool {
        let pct = change_pct(ev.open, ev.close);
        if pct.abs() < self.config.candle_threshold_pct {
            return false;
        }
        if !self.can_alert(KIND_CANDLE_1M, &ev.symbol).await {
            debug!("Candle alert for {} throttled by cooldown", ev.symbol);
            return false;
        }

        let text = format_candle_alert(ev, pct);
        if self.push(&text).await {
            self.set_cooldown(KIND_CANDLE_1M, &ev.symbol, self.config.candle_cooldown_sec)
                .await;
            info!("Candle alert sent for {}: {:+.2}%", ev.symbol, pct);
            true
        } else {
            false
        }
    }

    /// Fused-event alert path. Returns true when a notification went out.
    pub async fn on_fused(&self, ev: &FusedEvent) -> bool {
        if ev.severity < self.config.fused_severity_min {
            debug!(
                "Fused event for {} below severity floor ({} < {})",
                ev.symbol, ev.severity, self.config.fused_severity_min
            );
            return false;
        }
        if !self.can_alert(KIND_FUSED_EVENT, &ev.symbol).await {
            debug!("Fused alert for {} throttled by cooldown", ev.symbol);
            return false;
        }

        let text = format_fused_alert(ev);
        if self.push(&text).await {
            self.set_cooldown(KIND_FUSED_EVENT, &ev.symbol, self.config.fused_cooldown_sec)
                .await;
            info!(
                "Fused alert sent for {}: severity={}, direction={}",
                ev.symbol, ev.severity, ev.direction
            );
            true
        } else {
            false
        }
    }

    /// Fan out to every channel in parallel; true when any channel delivered.
    async fn push(&self, text: &str) -> bool {
        let sends = self.channels.iter().map(|ch| ch.send(text));
        join_all(sends).await.into_iter().any(|sent| sent)
    }

    async fn can_alert(&self, kind: &str, symbol: &str) -> bool {
        match self.kv.get(&cooldown_key(kind, symbol)).await {
            Ok(mark) => mark.is_none(),
            Err(e) => {
                // Without cooldown state the alert is dropped, not spammed.
                warn!("Cooldown read failed for {}: {}", symbol, e);
                false
            }
        }
    }

    async fn set_cooldown(&self, kind: &str, symbol: &str, ttl_sec: u64) {
        if let Err(e) = self.kv.put_with_ttl(&cooldown_key(kind, symbol), "1", ttl_sec).await {
            warn!("Cooldown write failed for {}: {}", symbol, e);
        }
    }

    pub async fn run(&self, mut rx: broadcast::Receiver<Value>) {
        loop {
            match rx.recv().await {
                Ok(payload) => self.handle_payload(&payload).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Alert gate lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Pure formatter for candle alerts (Telegram HTML; LINE strips the tags).
pub fn format_candle_alert(ev: &Candle1mEvent, pct: f64) -> String {
    let direction = if pct > 0.0 { "📈 上漲" } else { "📉 下跌" };
    let emoji = if pct.abs() > 2.0 { "🔥" } else { "⚠️" };

    format!(
        "{emoji} <b>[即時警報] {}</b>\n\
         ━━━━━━━━━━━━━━━\n\
         📊 1分鐘 K 線異動\n\
         • 方向:{direction} <b>{pct:+.2}%</b>\n\
         • O/H/L/C:{:.2}/{:.2}/{:.2}/{:.2}\n\
         • 成交量:{:.0}\n\
         • 時間:{}\n\
         ━━━━━━━━━━━━━━━\n\
         ⏰ {}",
        ev.symbol,
        ev.open,
        ev.high,
        ev.low,
        ev.close,
        ev.volume,
        ev.minute_bucket_ms,
        ev.finalized_at.format("%H:%M:%S"),
    )
}

/// Pure formatter for fused-event alerts.
pub fn format_fused_alert(ev: &FusedEvent) -> String {
    let (emoji, direction_zh) = match ev.direction {
        Direction::Positive => ("🟢", "📈 利多"),
        Direction::Negative => ("🔴", "📉 利空"),
        Direction::Neutral | Direction::Mixed => ("🟡", "➡️ 中性"),
    };

    let severity_emoji = if ev.severity >= 70 {
        "🔥🔥🔥"
    } else if ev.severity >= 50 {
        "🔥🔥"
    } else if ev.severity >= 35 {
        "🔥"
    } else {
        ""
    };

    let mut news_lines = Vec::new();
    for n in ev.news.iter().take(3) {
        if n.headline.is_empty() && n.url.is_empty() {
            continue;
        }
        let headline: String = n.headline.chars().take(60).collect();
        if n.url.is_empty() {
            news_lines.push(format!("  • {} ({})", headline, n.source));
        } else {
            news_lines.push(format!("  • {} ({})\n    🔗 {}", headline, n.source, n.url));
        }
    }
    let news_block = if news_lines.is_empty() {
        "  • (無可用新聞摘要)".to_string()
    } else {
        news_lines.join("\n")
    };

    format!(
        "{emoji} <b>[融合事件] {}</b> {severity_emoji}\n\
         ━━━━━━━━━━━━━━━\n\
         📊 Direction:{direction_zh}\n\
         🎯 Severity:<b>{}/100</b>\n\
         📈 1m Move:{:+.2}%\n\
         📰 News Count:{}\n\
         ━━━━━━━━━━━━━━━\n\
         <b>Top Headlines:</b>\n{news_block}\n\
         ━━━━━━━━━━━━━━━\n\
         ⏰ {}",
        ev.symbol,
        ev.severity,
        ev.price.change_pct,
        ev.news.len(),
        ev.fused_at.format("%H:%M:%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evidence::NewsEvidence;
    use crate::domain::events::FusedPrice;
    use crate::infrastructure::kv::InMemoryKvStore;
    use crate::infrastructure::push::RecordingChannel;
    use chrono::Utc;

    fn candle(symbol: &str, open: f64, close: f64) -> Candle1mEvent {
        Candle1mEvent {
            event_kind: KIND_CANDLE_1M.to_string(),
            symbol: symbol.to_string(),
            minute_bucket_ms: 1_700_000_040_000,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1000.0,
            finalized_at: Utc::now(),
        }
    }

    fn fused(symbol: &str, severity: u8) -> FusedEvent {
        FusedEvent {
            event_kind: KIND_FUSED_EVENT.to_string(),
            symbol: symbol.to_string(),
            minute_bucket_ms: 1_700_000_040_000,
            price: FusedPrice {
                open: 100.0,
                high: 102.0,
                low: 99.5,
                close: 101.2,
                volume: 1000.0,
                change_pct: 1.2,
            },
            news: vec![NewsEvidence::new(
                "NVDA beats estimates",
                "https://example.com/n",
                "finnhub",
                "",
                Utc::now().timestamp(),
            )],
            social: vec![],
            severity,
            direction: Direction::Positive,
            fused_at: Utc::now(),
        }
    }

    struct Rig {
        gate: AlertGate,
        telegram: Arc<RecordingChannel>,
        line: Arc<RecordingChannel>,
        kv: Arc<InMemoryKvStore>,
    }

    fn rig(telegram_ok: bool, line_ok: bool) -> Rig {
        let kv = Arc::new(InMemoryKvStore::new());
        let telegram = Arc::new(RecordingChannel::new("telegram", telegram_ok));
        let line = Arc::new(RecordingChannel::new("line", line_ok));
        let gate = AlertGate::new(
            kv.clone(),
            vec![telegram.clone(), line.clone()],
            AlertConfig::default(),
        );
        Rig { gate, telegram, line, kv }
    }

    #[tokio::test]
    async fn threshold_exactly_met_alerts_both_channels() {
        let rig = rig(true, true);
        // 0.9% on the nose
        assert!(rig.gate.on_candle(&candle("AAPL", 100.0, 100.9)).await);
        assert_eq!(rig.telegram.sent().await.len(), 1);
        assert_eq!(rig.line.sent().await.len(), 1);
        assert!(
            rig.kv.get("alert:cooldown:candle_1m:AAPL").await.unwrap().is_some(),
            "cooldown must be set after a successful send"
        );
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alerts() {
        let rig = rig(true, true);
        assert!(rig.gate.on_candle(&candle("AAPL", 100.0, 100.9)).await);
        // Bigger move right after, same symbol, still inside cooldown.
        assert!(!rig.gate.on_candle(&candle("AAPL", 100.0, 101.5)).await);
        assert_eq!(rig.telegram.sent().await.len(), 1);
        assert!(rig.kv.get("alert:cooldown:candle_1m:AAPL").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn below_threshold_is_silent() {
        let rig = rig(true, true);
        assert!(!rig.gate.on_candle(&candle("AAPL", 100.0, 100.5)).await);
        assert!(rig.telegram.sent().await.is_empty());
    }

    #[tokio::test]
    async fn single_channel_success_sets_cooldown() {
        let rig = rig(false, true);
        assert!(rig.gate.on_candle(&candle("TSLA", 100.0, 102.0)).await);
        assert!(rig.kv.get("alert:cooldown:candle_1m:TSLA").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn all_channels_failing_leaves_no_cooldown() {
        let rig = rig(false, false);
        assert!(!rig.gate.on_candle(&candle("TSLA", 100.0, 102.0)).await);
        assert!(rig.kv.get("alert:cooldown:candle_1m:TSLA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fused_severity_floor_is_inclusive() {
        let rig = rig(true, true);
        assert!(!rig.gate.on_fused(&fused("NVDA", 34)).await);
        assert!(rig.gate.on_fused(&fused("NVDA", 35)).await);
        assert!(rig.kv.get("alert:cooldown:fused_event:NVDA").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cooldowns_are_kind_scoped() {
        let rig = rig(true, true);
        assert!(rig.gate.on_candle(&candle("NVDA", 100.0, 101.5)).await);
        // Candle cooldown is live, fused alerts are unaffected.
        assert!(rig.gate.on_fused(&fused("NVDA", 42)).await);
        assert_eq!(rig.telegram.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn kv_outage_drops_the_alert() {
        let rig = rig(true, true);
        rig.kv.set_failing(true);
        assert!(!rig.gate.on_candle(&candle("AAPL", 100.0, 102.0)).await);
        assert!(rig.telegram.sent().await.is_empty());
    }

    #[test]
    fn candle_formatter_is_pure_and_tagged() {
        let ev = candle("AAPL", 100.0, 101.5);
        let text = format_candle_alert(&ev, 1.5);
        assert!(text.contains("AAPL"));
        assert!(text.contains("+1.50%"));
        assert!(text.contains("上漲"));
        assert_eq!(text, format_candle_alert(&ev, 1.5));
    }

    #[test]
    fn fused_formatter_includes_headlines() {
        let text = format_fused_alert(&fused("NVDA", 42));
        assert!(text.contains("NVDA"));
        assert!(text.contains("42/100"));
        assert!(text.contains("NVDA beats estimates"));
        assert!(text.contains("🔥"));
    }

    #[test]
    fn fused_formatter_handles_empty_news() {
        let mut ev = fused("NVDA", 42);
        ev.news.clear();
        let text = format_fused_alert(&ev);
        assert!(text.contains("無可用新聞摘要"));
    }
}
