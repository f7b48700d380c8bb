use dotenvy::dotenv;
use std::{sync::Arc, time::Duration};
use teloxide::{Bot, types::ChatId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bus::{InProcessBus, topics};
use common::actors::{Actor, ActorType};
use common::config::{AppConfig, TradingMode};
use common::logger;
use common::models::CoreSnapshot;
use market_data::{BinanceClient, DepthFetcher, Fetcher, KlinesFetcher, NewsCollector, NewsFeed};
use orchestrator::{Orchestrator, Scheduler};
use storage::{CycleStore, Database, SqliteStore};
use strategy::analyzers::{LlmNewsScorer, OrderFlowScorer, PriceActionScorer};
use strategy::inference::InferenceEngine;
use strategy::{DecisionCore, Normalizer, Scorer};

use crate::actors::supervisor::Supervisor;
use crate::services::execution_service::{BinanceTrader, ExecutionService, PaperTrader, Trader};
use crate::services::news_listener::{NewsListener, Operator};
use crate::services::signal_service::SignalService;
use crate::services::telegram_service::TelegramService;

mod actors;
mod services;

const KLINE_INTERVAL: &str = "1m";
const KLINE_LIMIT: u16 = 100;
const DEPTH_LIMIT: u16 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logger();
    dotenv().ok();
    debug!("System starting up...");

    let config = AppConfig::from_env()?;
    info!(
        "Trading {} every {:?} in {:?} mode",
        config.cycle.symbol, config.cycle.interval, config.trading_mode
    );

    let store = Arc::new(SqliteStore::new(Database::open(&config.workdir).await?));
    let core = startup_core(&config, store.latest_checkpoint().await?);
    if core.is_halted() {
        warn!("Starting halted. Send /resume or restart with RESET_HALT=true to trade again.");
    }

    let bus = Arc::new(InProcessBus::new());
    let orchestrator = Arc::new(Orchestrator::new(
        config.cycle.clone(),
        core,
        bus.clone(),
        store.clone(),
    ));
    let binance = Arc::new(BinanceClient::new(
        &config.binance_base_url,
        config.binance_api_key.clone(),
        config.binance_secret_key.clone(),
    )?);
    let normalizer = Arc::new(Normalizer::new(&config.normalizer));
    let news_feed = NewsFeed::new(config.news_buffer_size, config.news_sample);

    let llm_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    if config.llm_api_key.is_none() {
        warn!("DASHSCOPE_API_KEY not set, news signals will be unavailable");
    }
    debug!("Using AI Model: {}", config.model_path);

    let responders: Vec<(ActorType, Arc<dyn Fetcher>, Arc<dyn Scorer>)> = vec![
        (
            ActorType::NewsResponder,
            Arc::new(news_feed.clone()) as Arc<dyn Fetcher>,
            Arc::new(LlmNewsScorer::new(
                llm_client,
                &config.llm_base_url,
                &config.llm_model,
                config.llm_api_key.clone(),
            )) as Arc<dyn Scorer>,
        ),
        (
            ActorType::PriceActionResponder,
            Arc::new(KlinesFetcher::new(binance.clone(), KLINE_INTERVAL, KLINE_LIMIT)) as Arc<dyn Fetcher>,
            Arc::new(PriceActionScorer::default()) as Arc<dyn Scorer>,
        ),
        (
            ActorType::OrderFlowResponder,
            Arc::new(DepthFetcher::new(binance.clone(), DEPTH_LIMIT)) as Arc<dyn Fetcher>,
            Arc::new(OrderFlowScorer::new(InferenceEngine::new(&config.model_path))) as Arc<dyn Scorer>,
        ),
    ];

    let mut supervisor = Supervisor::new();

    for (actor_type, fetcher, scorer) in responders {
        let bus = bus.clone();
        let normalizer = normalizer.clone();
        supervisor.register_actor(
            actor_type,
            Box::new(move || {
                Box::new(SignalService::new(
                    actor_type,
                    bus.clone(),
                    fetcher.clone(),
                    scorer.clone(),
                    normalizer.clone(),
                )) as Box<dyn Actor>
            }),
        );
    }

    let bus_for_news = bus.clone();
    supervisor.register_actor(
        ActorType::NewsCollector,
        Box::new(move || {
            Box::new(NewsCollector::new(
                news_feed.clone(),
                bus_for_news.subscribe(topics::RAW_NEWS),
            )) as Box<dyn Actor>
        }),
    );

    let trader: Arc<dyn Trader> = match config.trading_mode {
        TradingMode::Paper => Arc::new(PaperTrader),
        TradingMode::Live => Arc::new(BinanceTrader::new(binance.clone())),
    };
    let bus_for_exec = bus.clone();
    supervisor.register_actor(
        ActorType::ExecutionResponder,
        Box::new(move || {
            Box::new(ExecutionService::new(bus_for_exec.clone(), trader.clone())) as Box<dyn Actor>
        }),
    );

    match config.telegram_token.clone() {
        Some(token) => {
            let bot = Bot::new(token);
            let operator = config.telegram_chat_id.map(|chat_id| Operator {
                chat_id: ChatId(chat_id),
                orchestrator: orchestrator.clone(),
            });
            tokio::spawn(NewsListener::new(bot.clone(), bus.clone(), operator).start());

            if let Some(chat_id) = config.telegram_chat_id {
                let bus_for_notify = bus.clone();
                supervisor.register_actor(
                    ActorType::Notifier,
                    Box::new(move || {
                        Box::new(TelegramService::new(
                            bot.clone(),
                            chat_id,
                            bus_for_notify.subscribe(topics::CYCLE_RECORDS),
                        )) as Box<dyn Actor>
                    }),
                );
            } else {
                warn!("TELEGRAM_CHAT_ID not set, notifications disabled");
            }
        }
        None => warn!("TELEGRAM_BOT_TOKEN not set, no news ingestion or notifications"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor_task = tokio::spawn(async move { supervisor.start(shutdown_rx).await });

    let scheduler = Scheduler::new(config.cycle.interval).start(move || {
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator.run_cycle().await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, letting the current cycle finish...");

    let stats = scheduler.stop().await;
    info!(
        "Scheduler fired {} tick(s), dropped {}, {} fault(s), max lateness {:?}",
        stats.ticks_fired, stats.ticks_dropped, stats.faults, stats.max_lateness
    );

    let _ = shutdown_tx.send(true);
    supervisor_task.await?;
    info!("Bye.");
    Ok(())
}

/// Rebuilds the decision core from the last checkpoint, if any.
fn startup_core(config: &AppConfig, checkpoint: Option<CoreSnapshot>) -> DecisionCore {
    let mut core = match checkpoint {
        Some(snapshot) => {
            info!(
                "Restoring from checkpoint taken at {} (equity {:.2})",
                snapshot.taken_at, snapshot.risk.equity
            );
            DecisionCore::restore(config.fusion.clone(), config.risk.clone(), snapshot)
        }
        None => DecisionCore::new(config.fusion.clone(), config.risk.clone()),
    };
    if config.reset_halt {
        info!("RESET_HALT set, clearing any restored halt");
        core.reset_halt();
    }
    core
}
