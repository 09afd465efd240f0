use crate::application::evidence_buffer::EvidenceBuffer;
use crate::domain::plan::{PLANNER_CONTRACT, TradePlan, build_fallback, summarize_structure, validate_plan};
use crate::domain::ports::{KvStore, ReasoningOracle};
use crate::domain::repositories::CandleRepository;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const CANDLE_HISTORY: usize = 120;
const STRUCTURE_WINDOW: usize = 60;
const CONTEXT_TAIL: usize = 30;
const CONTEXT_EVIDENCE: usize = 5;
const CATALYST_TOP: usize = 3;

pub struct ResponderConfig {
    pub news_lookback_sec: u64,
    pub social_lookback_sec: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            news_lookback_sec: 3600,
            social_lookback_sec: 3600,
        }
    }
}

/// Serves `analyze(symbol, timeframe)`: candle history plus the evidence
/// buffers, folded into a contract-conformant answer. The oracle can only
/// upgrade the deterministic fallback, never break the contract: invalid
/// answers are discarded.
pub struct AnalysisResponder {
    repository: Arc<dyn CandleRepository>,
    buffer: EvidenceBuffer,
    oracle: Arc<dyn ReasoningOracle>,
    config: ResponderConfig,
}

impl AnalysisResponder {
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        kv: Arc<dyn KvStore>,
        oracle: Arc<dyn ReasoningOracle>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            repository,
            buffer: EvidenceBuffer::new(kv),
            oracle,
            config,
        }
    }

    pub async fn analyze(&self, symbol: &str, timeframe: &str) -> TradePlan {
        let symbol = symbol.trim().to_uppercase();

        let mut candles = match self.repository.recent(&symbol, CANDLE_HISTORY).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("Candle history read failed for {}: {}", symbol, e);
                Vec::new()
            }
        };
        candles.reverse(); // chronological, oldest first

        let window_start = candles.len().saturating_sub(STRUCTURE_WINDOW);
        let structure = summarize_structure(&candles[window_start..]);

        let news = self
            .buffer
            .recent_news(&symbol, self.config.news_lookback_sec)
            .await;
        let social = self
            .buffer
            .recent_social(&symbol, self.config.social_lookback_sec)
            .await;

        let news_top3: Vec<String> = news
            .iter()
            .filter(|n| !n.headline.is_empty())
            .take(CATALYST_TOP)
            .map(|n| n.headline.clone())
            .collect();
        let social_top3: Vec<String> = social
            .iter()
            .filter(|s| !s.title.is_empty())
            .take(CATALYST_TOP)
            .map(|s| s.title.clone())
            .collect();

        let fallback = build_fallback(&symbol, timeframe, &structure, news_top3, social_top3);

        if !self.oracle.is_configured() {
            info!("Analyze {}: returning fallback (no oracle)", symbol);
            return fallback;
        }

        let tail_start = candles.len().saturating_sub(CONTEXT_TAIL);
        let context = json!({
            "symbol": symbol,
            "timeframe": timeframe,
            "latest_price": structure.latest_price,
            "trend": structure.trend,
            "volatility_regime": structure.volatility,
            "support": structure.support,
            "resistance": structure.resistance,
            "recent_news": news.iter().take(CONTEXT_EVIDENCE).collect::<Vec<_>>(),
            "recent_social": social.iter().take(CONTEXT_EVIDENCE).collect::<Vec<_>>(),
            "recent_candles_1m_tail": &candles[tail_start..],
        });

        match self.oracle.reason(PLANNER_CONTRACT, context).await {
            Ok(answer) => match validate_plan(&answer) {
                Ok(plan) => {
                    info!("Analyze {}: oracle answer accepted", symbol);
                    plan
                }
                Err(violation) => {
                    warn!("Analyze {}: oracle answer rejected ({}), using fallback", symbol, violation);
                    fallback
                }
            },
            Err(e) => {
                warn!("Analyze {}: oracle failed ({}), using fallback", symbol, e);
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::FinalizedCandle;
    use crate::domain::evidence::NewsEvidence;
    use crate::infrastructure::kv::InMemoryKvStore;
    use crate::infrastructure::oracle::{DisabledOracle, StubOracle};
    use crate::infrastructure::persistence::InMemoryCandleRepository;
    use chrono::Utc;

    async fn seed_candles(repo: &InMemoryCandleRepository, n: usize, close: f64) {
        for i in 0..n {
            repo.upsert(&FinalizedCandle {
                symbol: "AAPL".to_string(),
                minute_bucket_ms: i as i64 * 60_000,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 100.0,
                finalized_at: Utc::now(),
            })
            .await
            .unwrap();
        }
    }

    fn responder(
        repo: Arc<InMemoryCandleRepository>,
        kv: Arc<InMemoryKvStore>,
        oracle: Arc<dyn ReasoningOracle>,
    ) -> AnalysisResponder {
        AnalysisResponder::new(repo, kv, oracle, ResponderConfig::default())
    }

    #[tokio::test]
    async fn fallback_without_oracle() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        seed_candles(&repo, 80, 150.0).await;
        let kv = Arc::new(InMemoryKvStore::new());
        let r = responder(repo, kv, Arc::new(DisabledOracle));

        let plan = r.analyze("aapl", "15m").await;
        assert_eq!(plan.snapshot.symbol, "AAPL");
        assert_eq!(plan.snapshot.price, 150.0);
        assert_eq!(plan.suggested_action.action, "WATCH");
        assert!(plan.suggested_action.invalidation_rules.len() >= 2);
        assert!(!plan.disclosures.is_empty());
        let sum = plan.scenarios.base.prob + plan.scenarios.bull.prob + plan.scenarios.bear.prob;
        assert_eq!(sum, 100);
    }

    #[tokio::test]
    async fn empty_history_still_answers() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let kv = Arc::new(InMemoryKvStore::new());
        let r = responder(repo, kv, Arc::new(DisabledOracle));

        let plan = r.analyze("GHOST", "1h").await;
        assert_eq!(plan.snapshot.price, 0.0);
        assert!(plan.market_structure.support.is_empty());
    }

    #[tokio::test]
    async fn catalysts_come_from_the_buffer() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        seed_candles(&repo, 30, 150.0).await;
        let kv = Arc::new(InMemoryKvStore::new());
        let buffer = EvidenceBuffer::new(kv.clone());
        let now = Utc::now().timestamp();
        for i in 0..4 {
            buffer
                .append_news(
                    "AAPL",
                    &NewsEvidence::new(&format!("headline {i}"), "https://e/x", "rss", "", now),
                    7200,
                )
                .await;
        }
        let r = responder(repo, kv, Arc::new(DisabledOracle));

        let plan = r.analyze("AAPL", "15m").await;
        assert_eq!(plan.catalysts.news_top3.len(), 3);
        assert_eq!(plan.catalysts.news_top3[0], "headline 3");
    }

    #[tokio::test]
    async fn valid_oracle_answer_wins() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        seed_candles(&repo, 30, 150.0).await;
        let kv = Arc::new(InMemoryKvStore::new());

        let structure = summarize_structure(&[]);
        let mut answer = build_fallback("AAPL", "15m", &structure, vec![], vec![]);
        answer.suggested_action.action = "BUY_ZONE".to_string();
        let oracle = StubOracle::new(vec![Ok(serde_json::to_value(&answer).unwrap())]);

        let r = responder(repo, kv, Arc::new(oracle));
        let plan = r.analyze("AAPL", "15m").await;
        assert_eq!(plan.suggested_action.action, "BUY_ZONE");
    }

    #[tokio::test]
    async fn contract_violation_falls_back() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        seed_candles(&repo, 30, 150.0).await;
        let kv = Arc::new(InMemoryKvStore::new());

        // Probabilities sum to 90: reject.
        let structure = summarize_structure(&[]);
        let mut answer = build_fallback("AAPL", "15m", &structure, vec![], vec![]);
        answer.scenarios.base.prob = 45;
        let oracle = StubOracle::new(vec![Ok(serde_json::to_value(&answer).unwrap())]);

        let r = responder(repo, kv, Arc::new(oracle));
        let plan = r.analyze("AAPL", "15m").await;
        assert_eq!(plan.suggested_action.action, "WATCH");
        assert_eq!(plan.scenarios.base.prob, 55);
    }

    #[tokio::test]
    async fn oracle_transport_failure_falls_back() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        seed_candles(&repo, 30, 150.0).await;
        let kv = Arc::new(InMemoryKvStore::new());
        let oracle = StubOracle::new(vec![Err(anyhow::anyhow!("timeout"))]);

        let r = responder(repo, kv, Arc::new(oracle));
        let plan = r.analyze("AAPL", "15m").await;
        assert_eq!(plan.suggested_action.action, "WATCH");
    }
}
