use crate::domain::candle::FinalizedCandle;
use crate::domain::errors::PlanViolation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// System contract sent to the reasoning oracle. The oracle must answer with
/// JSON matching [`TradePlan`]; anything else falls back to the deterministic
/// answer.
pub const PLANNER_CONTRACT: &str = r#"
You are the 'trade-planner' skill.
You MUST output valid JSON strictly matching this schema:

{
  "snapshot": {
    "symbol": "AAPL",
    "timeframe": "15m|1h|1d",
    "price": 0.0,
    "volatility_regime": "low|normal|high"
  },
  "catalysts": {
    "news_top3": ["headline 1", "headline 2", "headline 3"],
    "social_top3": ["...", "...", "..."]
  },
  "market_structure": {
    "trend": "up|down|range",
    "support": [price levels],
    "resistance": [price levels],
    "volume_note": "brief volume observation"
  },
  "scenarios": {
    "base": {"path": "most likely scenario description", "prob": 0-100},
    "bull": {"path": "bullish scenario description", "prob": 0-100},
    "bear": {"path": "bearish scenario description", "prob": 0-100}
  },
  "suggested_action": {
    "action": "WATCH|BUY_ZONE|REDUCE|HEDGE|AVOID",
    "timing_window": "e.g. next 1-4h / 1-3d",
    "confidence": 0-100,
    "invalidation_rules": ["rule 1", "rule 2"],
    "risk_flags": ["high_vol", "news_uncertainty", "thin_liquidity"]
  },
  "disclosures": [
    "This is informational decision support, not financial advice.",
    "High volatility can cause rapid losses."
  ]
}

Rules:
1. NEVER output a one-line BUY/SELL without invalidation rules.
2. Always include at least 2 invalidation rules.
3. Use the provided candles + recent news for your reasoning.
4. Keep text concise; prefer short bullets.
5. Probabilities across scenarios must sum to 100.
6. Confidence reflects your certainty in the suggested action.
"#;

pub const ACTIONS: [&str; 5] = ["WATCH", "BUY_ZONE", "REDUCE", "HEDGE", "AVOID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub timeframe: String,
    pub price: f64,
    pub volatility_regime: VolatilityRegime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalysts {
    pub news_top3: Vec<String>,
    pub social_top3: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStructure {
    pub trend: Trend,
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
    pub volume_note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub path: String,
    pub prob: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenarios {
    pub base: Scenario,
    pub bull: Scenario,
    pub bear: Scenario,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub action: String,
    pub timing_window: String,
    pub confidence: i64,
    pub invalidation_rules: Vec<String>,
    pub risk_flags: Vec<String>,
}

/// The decision-support answer returned by `/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub snapshot: Snapshot,
    pub catalysts: Catalysts,
    pub market_structure: MarketStructure,
    pub scenarios: Scenarios,
    pub suggested_action: SuggestedAction,
    pub disclosures: Vec<String>,
}

/// Market structure derived from a chronological candle window.
#[derive(Debug, Clone)]
pub struct StructureSummary {
    pub trend: Trend,
    pub volatility: VolatilityRegime,
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
    pub latest_price: f64,
}

/// Candles fewer than this leave the trend and volatility calls undecided.
const MIN_STRUCTURE_CANDLES: usize = 20;

/// Compute trend, volatility regime, and support/resistance from candles in
/// chronological order (oldest first).
pub fn summarize_structure(candles: &[FinalizedCandle]) -> StructureSummary {
    let latest_price = candles.last().map(|c| c.close).unwrap_or(0.0);

    let (support, resistance) = if candles.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let min_low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let max_high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        (vec![min_low], vec![max_high])
    };

    let trend = if candles.len() < MIN_STRUCTURE_CANDLES {
        Trend::Range
    } else {
        let first = candles[0].close;
        let last = candles[candles.len() - 1].close;
        if last > first * 1.01 {
            Trend::Up
        } else if last < first * 0.99 {
            Trend::Down
        } else {
            Trend::Range
        }
    };

    let volatility = if candles.len() < MIN_STRUCTURE_CANDLES {
        VolatilityRegime::Normal
    } else {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mx = closes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mn = closes.iter().cloned().fold(f64::INFINITY, f64::min);
        if mn <= 0.0 {
            VolatilityRegime::Normal
        } else {
            let rng = (mx - mn) / mn;
            if rng > 0.03 {
                VolatilityRegime::High
            } else if rng < 0.01 {
                VolatilityRegime::Low
            } else {
                VolatilityRegime::Normal
            }
        }
    };

    StructureSummary {
        trend,
        volatility,
        support,
        resistance,
        latest_price,
    }
}

/// Deterministic answer used when the oracle is absent or misbehaves.
pub fn build_fallback(
    symbol: &str,
    timeframe: &str,
    structure: &StructureSummary,
    news_top3: Vec<String>,
    social_top3: Vec<String>,
) -> TradePlan {
    TradePlan {
        snapshot: Snapshot {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            price: structure.latest_price,
            volatility_regime: structure.volatility,
        },
        catalysts: Catalysts {
            news_top3,
            social_top3,
        },
        market_structure: MarketStructure {
            trend: structure.trend,
            support: structure.support.clone(),
            resistance: structure.resistance.clone(),
            volume_note: "Volume analysis from last 30 candles".to_string(),
        },
        scenarios: Scenarios {
            base: Scenario {
                path: "Continue current regime with mean reversion near key levels.".to_string(),
                prob: 55,
            },
            bull: Scenario {
                path: "Break above resistance with volume confirmation.".to_string(),
                prob: 25,
            },
            bear: Scenario {
                path: "Lose support and accelerate downside.".to_string(),
                prob: 20,
            },
        },
        suggested_action: SuggestedAction {
            action: "WATCH".to_string(),
            timing_window: "next 1-4h".to_string(),
            confidence: 55,
            invalidation_rules: vec![
                "If price breaks below support with rising volume.".to_string(),
                "If major negative news breaks.".to_string(),
            ],
            risk_flags: vec!["uncertainty".to_string()],
        },
        disclosures: vec![
            "This is informational decision support, not financial advice.".to_string(),
            "High volatility can cause rapid losses.".to_string(),
        ],
    }
}

/// Validate an oracle answer against the contract. A plan that fails any
/// check is discarded in favor of the fallback.
pub fn validate_plan(value: &Value) -> Result<TradePlan, PlanViolation> {
    let plan: TradePlan = serde_json::from_value(value.clone())
        .map_err(|e| PlanViolation::Malformed { reason: e.to_string() })?;

    let sum = plan.scenarios.base.prob + plan.scenarios.bull.prob + plan.scenarios.bear.prob;
    if sum != 100 {
        return Err(PlanViolation::ProbabilitiesNotNormalized { sum });
    }
    if plan.suggested_action.invalidation_rules.len() < 2 {
        return Err(PlanViolation::MissingInvalidations {
            count: plan.suggested_action.invalidation_rules.len(),
        });
    }
    if !ACTIONS.contains(&plan.suggested_action.action.as_str()) {
        return Err(PlanViolation::UnknownAction {
            action: plan.suggested_action.action.clone(),
        });
    }
    if plan.disclosures.is_empty() {
        return Err(PlanViolation::MissingDisclosures);
    }
    Ok(plan)
}
