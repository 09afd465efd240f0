//! Telegram webhook commands: watchlist management plus on-demand analysis.

use crate::application::responder::AnalysisResponder;
use crate::domain::plan::TradePlan;
use crate::domain::ports::KvStore;
use crate::infrastructure::push::TelegramChannel;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

const HELP_TEXT: &str = "🤖 <b>Marketfuse Assistant</b>\n\n\
    <b>Market & Analysis:</b>\n\
    • /analyze <SYM> - In-depth fused analysis\n\
    • /watch add <SYM> - Follow a symbol\n\
    • /watch remove <SYM> - Unfollow a symbol\n\
    • /watchlist - Show your followed symbols\n";

fn watch_key(chat_id: &str) -> String {
    format!("watch:{}", chat_id)
}

/// Split a message into a lower-cased command and its arguments.
/// Handles the `/cmd@botname` form Telegram uses in groups.
pub fn parse_command(text: &str) -> (String, Vec<String>) {
    let text = text.trim();
    if !text.starts_with('/') {
        return (String::new(), Vec::new());
    }
    let mut parts = text.split_whitespace();
    let cmd = parts
        .next()
        .unwrap_or("")
        .to_lowercase()
        .split('@')
        .next()
        .unwrap_or("")
        .to_string();
    (cmd, parts.map(|s| s.to_string()).collect())
}

/// Render an analysis answer for Telegram.
pub fn format_analyze_result(symbol: &str, plan: &TradePlan) -> String {
    let mut lines = vec![
        format!("📊 <b>{} Analysis</b>", symbol),
        "━━━━━━━━━━━━━━━".to_string(),
    ];
    if plan.snapshot.price > 0.0 {
        lines.push(format!("💰 Price: ${:.2}", plan.snapshot.price));
    }
    lines.push(format!(
        "📈 Trend: {:?} | Vol: {:?}",
        plan.market_structure.trend, plan.snapshot.volatility_regime
    ));
    lines.push(String::new());
    lines.push(format!("🎯 <b>Action: {}</b>", plan.suggested_action.action));
    lines.push(format!("📊 Confidence: {}%", plan.suggested_action.confidence));
    lines.push(format!("⏰ Timing: {}", plan.suggested_action.timing_window));

    if !plan.suggested_action.risk_flags.is_empty() {
        let flags: Vec<&str> = plan
            .suggested_action
            .risk_flags
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        lines.push(format!("⚠️ Risks: {}", flags.join(", ")));
    }

    if !plan.suggested_action.invalidation_rules.is_empty() {
        lines.push(String::new());
        lines.push("❌ Invalidation:".to_string());
        for rule in plan.suggested_action.invalidation_rules.iter().take(2) {
            let short: String = rule.chars().take(60).collect();
            lines.push(format!("  • {}", short));
        }
    }

    if !plan.catalysts.news_top3.is_empty() || !plan.catalysts.social_top3.is_empty() {
        lines.push(String::new());
        lines.push("🔍 <b>Catalysts:</b>".to_string());
        if !plan.catalysts.news_top3.is_empty() {
            lines.push(" 📰 <i>News:</i>".to_string());
            for n in plan.catalysts.news_top3.iter().take(2) {
                let short: String = n.chars().take(60).collect();
                lines.push(format!("  • {}", short));
            }
        }
        if !plan.catalysts.social_top3.is_empty() {
            lines.push(" 💬 <i>Social:</i>".to_string());
            for s in plan.catalysts.social_top3.iter().take(2) {
                let short: String = s.chars().take(60).collect();
                lines.push(format!("  • {}", short));
            }
        }
    }

    lines.push(String::new());
    lines.push("⚠️ <i>Decision support only, not financial advice.</i>".to_string());
    lines.join("\n")
}

pub struct CommandBot {
    kv: Arc<dyn KvStore>,
    telegram: Arc<TelegramChannel>,
    responder: Arc<AnalysisResponder>,
}

impl CommandBot {
    pub fn new(
        kv: Arc<dyn KvStore>,
        telegram: Arc<TelegramChannel>,
        responder: Arc<AnalysisResponder>,
    ) -> Self {
        Self { kv, telegram, responder }
    }

    pub async fn handle_update(&self, update: &Value) {
        let msg = update
            .get("message")
            .or_else(|| update.get("edited_message"))
            .cloned()
            .unwrap_or(Value::Null);

        let chat_id = match msg.pointer("/chat/id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return,
        };
        let text = msg.get("text").and_then(Value::as_str).unwrap_or("");

        let (cmd, args) = parse_command(text);
        match cmd.as_str() {
            "/start" | "/help" => {
                self.reply(&chat_id, HELP_TEXT).await;
            }
            "/watch" => self.handle_watch(&chat_id, &args).await,
            "/watchlist" => self.handle_watchlist(&chat_id).await,
            "/analyze" => self.handle_analyze(&chat_id, &args).await,
            _ => {}
        }
    }

    async fn handle_watch(&self, chat_id: &str, args: &[String]) {
        if args.len() < 2 {
            self.reply(chat_id, "Usage: /watch add <SYM> or /watch remove <SYM>").await;
            return;
        }
        let action = args[0].to_lowercase();
        let sym = args[1].to_uppercase();
        let key = watch_key(chat_id);

        match action.as_str() {
            "add" => {
                if let Err(e) = self.kv.set_add(&key, &sym).await {
                    warn!("Watchlist add failed for {}: {}", chat_id, e);
                    self.reply(chat_id, "❌ Watchlist unavailable, try again later.").await;
                    return;
                }
                self.reply(chat_id, &format!("✅ Added <b>{}</b> to watchlist.", sym)).await;
            }
            "remove" => {
                if let Err(e) = self.kv.set_remove(&key, &sym).await {
                    warn!("Watchlist remove failed for {}: {}", chat_id, e);
                    self.reply(chat_id, "❌ Watchlist unavailable, try again later.").await;
                    return;
                }
                self.reply(chat_id, &format!("🗑 Removed <b>{}</b> from watchlist.", sym)).await;
            }
            _ => {
                self.reply(chat_id, "Usage: /watch add <SYM> or /watch remove <SYM>").await;
            }
        }
    }

    async fn handle_watchlist(&self, chat_id: &str) {
        let items = self.kv.set_members(&watch_key(chat_id)).await.unwrap_or_default();
        if items.is_empty() {
            self.reply(chat_id, "📌 Watchlist is empty. Use /watch add <SYM> to add symbols.")
                .await;
        } else {
            let listing: Vec<String> = items.iter().map(|s| format!("• {}", s)).collect();
            self.reply(chat_id, &format!("📌 <b>Your Watchlist:</b>\n{}", listing.join("\n")))
                .await;
        }
    }

    async fn handle_analyze(&self, chat_id: &str, args: &[String]) {
        let Some(sym) = args.first() else {
            self.reply(chat_id, "Usage: /analyze <SYM>").await;
            return;
        };
        let sym = sym.to_uppercase();

        self.reply(chat_id, &format!("🔄 Analyzing {}...", sym)).await;
        let plan = self.responder.analyze(&sym, "15m").await;
        self.reply(chat_id, &format_analyze_result(&sym, &plan)).await;
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if !self.telegram.send_to(chat_id, text).await {
            warn!("Bot reply to {} not delivered", chat_id);
        }
    }
}
