use anyhow::{Context, Result};
use clap::Parser;
use marketfuse::application::aggregator::CandleAggregator;
use marketfuse::application::alert_gate::{AlertConfig, AlertGate};
use marketfuse::application::collector::NewsCollector;
use marketfuse::application::finalizer::CandleFinalizer;
use marketfuse::application::fusion_engine::{FusionConfig, FusionEngine};
use marketfuse::application::responder::{AnalysisResponder, ResponderConfig};
use marketfuse::application::streamer::TradeStreamer;
use marketfuse::config::Config;
use marketfuse::domain::events::{TOPIC_EVENTS_NORMALIZED, TOPIC_NEWS_RAW, TOPIC_SOCIAL_RAW, TOPIC_TRADES_RAW};
use marketfuse::domain::ports::{EventBus, KvStore, PushChannel, ReasoningOracle};
use marketfuse::domain::repositories::CandleRepository;
use marketfuse::infrastructure::event_bus::InProcessBus;
use marketfuse::infrastructure::feeds::{FinnhubFeed, FinnhubNewsClient};
use marketfuse::infrastructure::kv::RedisKvStore;
use marketfuse::infrastructure::oracle::{DisabledOracle, GeminiOracle};
use marketfuse::infrastructure::persistence::{Database, SqliteCandleRepository};
use marketfuse::infrastructure::push::{LineChannel, TelegramChannel};
use marketfuse::interfaces::bot::CommandBot;
use marketfuse::interfaces::http::{AppState, router};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "marketfuse", about = "Streaming market-intelligence fusion engine")]
struct Args {
    /// Override the HTTP listen address from the environment
    #[arg(long)]
    listen: Option<String>,

    /// Comma-separated background services to run
    /// (any of: streamer, finalizer, collector)
    #[arg(long, default_value = "streamer,finalizer,collector")]
    services: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let services: Vec<&str> = args.services.split(',').map(str::trim).collect();
    let run_streamer = services.contains(&"streamer");
    let run_finalizer = services.contains(&"finalizer");
    let run_collector = services.contains(&"collector");

    if run_streamer {
        // Missing feed credentials must fail here, not mid-stream.
        config.require_feed_credentials()?;
    }

    info!("Starting marketfuse");
    info!("Symbols: {:?}", config.symbols);

    // ── Shared state ─────────────────────────────────────────────────────
    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.redis_url).await?);
    let database = Database::new(&config.database_url).await?;
    let repository: Arc<dyn CandleRepository> =
        Arc::new(SqliteCandleRepository::new(database.pool.clone()));
    let bus = InProcessBus::new();
    let bus_dyn: Arc<dyn EventBus> = Arc::new(bus.clone());

    // ── Push channels & oracle ───────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        &config.telegram_bot_token,
        &config.telegram_chat_id,
    ));
    let line = Arc::new(LineChannel::new(
        &config.line_channel_access_token,
        &config.line_to,
    ));
    let channels: Vec<Arc<dyn PushChannel>> = vec![telegram.clone(), line];

    let oracle: Arc<dyn ReasoningOracle> = if config.oracle_api_key.is_empty() {
        Arc::new(DisabledOracle)
    } else {
        Arc::new(GeminiOracle::new(&config.oracle_api_key, &config.oracle_model))
    };

    // ── Stages ───────────────────────────────────────────────────────────
    let aggregator = Arc::new(CandleAggregator::new(kv.clone(), config.candle_ttl_sec));
    let finalizer = Arc::new(CandleFinalizer::new(
        kv.clone(),
        repository.clone(),
        bus_dyn.clone(),
        config.finalize_grace_sec,
    ));
    let fusion = Arc::new(FusionEngine::new(
        kv.clone(),
        bus_dyn.clone(),
        FusionConfig {
            join_threshold_pct: config.join_threshold_pct,
            news_lookback_sec: config.news_lookback_sec,
            social_lookback_sec: config.social_lookback_sec,
            evidence_retention_sec: config.evidence_retention_sec,
            watchlist: config.watchlist(),
        },
    ));
    let alert_gate = Arc::new(AlertGate::new(
        kv.clone(),
        channels,
        AlertConfig {
            candle_threshold_pct: config.candle_alert_threshold_pct,
            fused_severity_min: config.fused_alert_severity_min,
            candle_cooldown_sec: config.candle_cooldown_sec,
            fused_cooldown_sec: config.fused_cooldown_sec,
        },
    ));
    let collector = Arc::new(NewsCollector::new(
        kv.clone(),
        bus_dyn.clone(),
        FinnhubNewsClient::new(&config.news_api_key),
        config.rss_urls.clone(),
        config.news_dedup_ttl_sec,
    ));
    let responder = Arc::new(AnalysisResponder::new(
        repository.clone(),
        kv.clone(),
        oracle,
        ResponderConfig {
            news_lookback_sec: config.analysis_news_lookback_sec,
            social_lookback_sec: config.analysis_social_lookback_sec,
        },
    ));
    let bot = Arc::new(CommandBot::new(kv.clone(), telegram, responder.clone()));

    // ── In-process subscriptions ─────────────────────────────────────────
    {
        let rx = bus.subscribe(TOPIC_TRADES_RAW).await;
        let agg = aggregator.clone();
        tokio::spawn(async move { agg.run(rx).await });
    }
    for topic in [TOPIC_NEWS_RAW, TOPIC_SOCIAL_RAW, TOPIC_EVENTS_NORMALIZED] {
        let rx = bus.subscribe(topic).await;
        let fusion = fusion.clone();
        tokio::spawn(async move { fusion.run(rx).await });
    }
    {
        let rx = bus.subscribe(TOPIC_EVENTS_NORMALIZED).await;
        let gate = alert_gate.clone();
        tokio::spawn(async move { gate.run(rx).await });
    }

    // ── Background services ──────────────────────────────────────────────
    if run_finalizer {
        let finalizer = finalizer.clone();
        let interval = config.finalize_interval_sec;
        tokio::spawn(async move { finalizer.run(interval).await });
        info!("Finalizer tick every {}s", config.finalize_interval_sec);
    }

    if run_collector {
        let collector = collector.clone();
        let interval = config.news_poll_interval_sec;
        tokio::spawn(async move { collector.run(interval).await });
        info!("News collection every {}s", config.news_poll_interval_sec);
    }

    if run_streamer {
        let feed = FinnhubFeed::new(
            &config.feed_ws_url,
            &config.feed_token,
            config.symbols.clone(),
            config.ping_interval_sec,
        );
        let streamer = TradeStreamer::new(
            feed,
            bus_dyn.clone(),
            config.reconnect_min_delay_sec,
            config.reconnect_max_delay_sec,
        );
        tokio::spawn(async move { streamer.run().await });

        let hb_bus = bus_dyn.clone();
        tokio::spawn(async move { TradeStreamer::run_heartbeat(hb_bus).await });
        info!("Trade streamer launched");
    }

    // ── HTTP control surface ─────────────────────────────────────────────
    let state = Arc::new(AppState {
        aggregator,
        finalizer,
        fusion,
        alert_gate,
        collector,
        responder,
        bot,
        webhook_secret: config.telegram_webhook_secret.clone(),
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Control surface listening on {}", config.listen_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP server stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");
    server.abort();

    Ok(())
}
