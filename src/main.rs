//! AiTrader - rule-based crypto trading bot
//!
//! Usage: cargo run --bin aitrader

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aitrader::config::{AppConfig, RuntimeConfig};
use aitrader::engine::{BotContext, BotFlags, CoreState, DecisionEngine, LogNotifier};
use aitrader::exchange::{Account, BybitMarketData, MarketData, OrderExecutor};
use aitrader::features::IndicatorEngine;
use aitrader::paper_trading::PaperExchange;
use aitrader::strategy::SignalFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.bot.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.bot.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);

    info!("🚀 AiTrader starting");
    info!("Config: {}", config);

    let now = Utc::now();
    let layout = config.data_layout();
    let core = CoreState::open(
        &layout,
        config.stats.to_runtime(),
        config.risk.to_runtime(),
        now,
    )
    .context("Failed to load decision core state")?;

    let (bybit, retry) = config.exchange.to_runtime();
    let market: Arc<dyn MarketData> = Arc::new(BybitMarketData::new(bybit, retry)?);
    let paper = Arc::new(PaperExchange::new(config.paper.to_runtime()).with_prices(Arc::clone(&market)));
    let account: Arc<dyn Account> = paper.clone();
    let paper_executor: Arc<dyn OrderExecutor> = paper;

    let flags = Arc::new(BotFlags::new(
        true,
        !config.bot.dry_run,
        config.trading_mode()?,
    ));
    if flags.is_live() {
        warn!("Live trading requested but no live executor is configured; orders will be rejected");
    }

    let ctx = BotContext {
        market,
        account,
        paper: paper_executor,
        live: None,
        notifier: Arc::new(LogNotifier::new(&config.bot.tag)),
    };

    let mut engine = DecisionEngine::new(
        config.to_runtime(),
        Arc::clone(&flags),
        IndicatorEngine::new(config.indicators.to_runtime()),
        SignalFilter::new(config.filter.to_runtime()),
        core,
        ctx,
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.bot.cycle_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        symbols = ?engine.settings().symbols,
        interval_secs = config.bot.cycle_interval_secs,
        live = flags.is_live(),
        mode = %flags.trading_mode(),
        "Trading loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.run_cycle(Utc::now()).await;
                let executed = report.outcomes.iter().filter(|(_, o)| o.is_executed()).count();
                info!(
                    settled = report.settled,
                    executed,
                    symbols = report.outcomes.len(),
                    "Cycle complete"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested");
                flags.stop();
                break;
            }
        }
    }

    let final_status = engine.status_report(None, Utc::now());
    info!("\n{}", final_status.render());
    Ok(())
}
