//! HTTP control surface.
//!
//! Status policy: invalid input is acknowledged with 204 so the bus stops
//! redelivering it, transient backend trouble returns 503 (retryable), and
//! only genuinely unexpected failures surface as 500.

use crate::application::aggregator::CandleAggregator;
use crate::application::alert_gate::AlertGate;
use crate::application::collector::NewsCollector;
use crate::application::finalizer::CandleFinalizer;
use crate::application::fusion_engine::FusionEngine;
use crate::application::responder::AnalysisResponder;
use crate::infrastructure::pubsub::decode_push;
use crate::interfaces::bot::CommandBot;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

pub struct AppState {
    pub aggregator: Arc<CandleAggregator>,
    pub finalizer: Arc<CandleFinalizer>,
    pub fusion: Arc<FusionEngine>,
    pub alert_gate: Arc<AlertGate>,
    pub collector: Arc<NewsCollector>,
    pub responder: Arc<AnalysisResponder>,
    pub bot: Arc<CommandBot>,
    pub webhook_secret: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/trades/pubsub", post(trades_pubsub))
        .route("/flush", post(flush))
        .route("/fusion/pubsub", post(fusion_pubsub))
        .route("/alerts/pubsub", post(alerts_pubsub))
        .route("/run", post(run_collector))
        .route("/analyze", post(analyze))
        .route("/telegram", post(telegram))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

async fn trades_pubsub(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Value>,
) -> StatusCode {
    let Some(payload) = decode_push(&envelope) else {
        return StatusCode::NO_CONTENT;
    };
    match state.aggregator.handle_payload(&payload).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            // Store trouble: ask the bus to redeliver.
            warn!("Trade ingest failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn flush(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.finalizer.flush().await;
    Json(json!({"ok": true, "flushed": report.flushed, "errors": report.errors}))
}

async fn fusion_pubsub(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Value>,
) -> StatusCode {
    if let Some(payload) = decode_push(&envelope) {
        state.fusion.handle_payload(&payload).await;
    }
    StatusCode::NO_CONTENT
}

async fn alerts_pubsub(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Value>,
) -> StatusCode {
    if let Some(payload) = decode_push(&envelope) {
        state.alert_gate.handle_payload(&payload).await;
    }
    StatusCode::NO_CONTENT
}

async fn run_collector(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.collector.run_once().await;
    Json(json!({"ok": true, "published": report.published, "skipped": report.skipped}))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    symbol: String,
    #[serde(default = "default_timeframe")]
    timeframe: String,
}

fn default_timeframe() -> String {
    "15m".to_string()
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AnalyzeRequest>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(req)) = body else {
        return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": "invalid json"})));
    };
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": "symbol required"})));
    }

    let plan = state.responder.analyze(&symbol, req.timeframe.trim()).await;
    match serde_json::to_value(&plan) {
        Ok(result) => (StatusCode::OK, Json(json!({"ok": true, "result": result}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

async fn telegram(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> StatusCode {
    if !state.webhook_secret.is_empty() {
        let header = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if header != state.webhook_secret {
            warn!("Rejected telegram webhook with bad secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let Ok(Json(update)) = body else {
        return StatusCode::BAD_REQUEST;
    };
    state.bot.handle_update(&update).await;
    StatusCode::NO_CONTENT
}
