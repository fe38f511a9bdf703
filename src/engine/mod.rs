//! Decision Orchestrator
//!
//! One cycle, one symbol at a time:
//! candles → indicators → signal filter → confidence decision → risk gate →
//! order execution → journal. Settled pnl flows back into the confidence
//! store, the risk gate and the signal statistics.
//!
//! All mutable trading state lives in [`DecisionEngine`] and is owned by the
//! task that drives the cycle. Other tasks only touch the shared
//! [`BotFlags`].

mod flags;
mod notify;
pub mod reconcile;
pub mod report;

pub use flags::BotFlags;
pub use notify::{LogNotifier, Notifier};
pub use reconcile::BalanceReconciler;
pub use report::{ReportSchedule, StatusReport};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{BotError, Result};
use crate::exchange::{Account, MarketData, OrderExecutor};
use crate::features::IndicatorEngine;
use crate::persistence::{DataLayout, JsonFileStore, MemoryStore, StateStore, TradeJournal, TradeLog};
use crate::risk::{BlockReason, DailyStats, DailyStatsTracker, RiskConfig, RiskGate};
use crate::strategy::{
    ConfidenceStore, FilterInput, SideStats, SignalFilter, SignalStatsBook, StatsGateConfig,
};
use crate::types::{ClosedPnl, FilteredSignal, OrderRequest, Signal, TradeRecord};

const RECENT_TRADES_IN_REPORT: usize = 5;

/// Persistent decision-core state for one bot instance
pub struct CoreState {
    pub confidence: ConfidenceStore,
    pub stats: SignalStatsBook,
    pub risk: RiskGate,
    pub daily: DailyStatsTracker,
    pub journal: Box<dyn TradeLog>,
    stats_store: Box<dyn StateStore<BTreeMap<String, SideStats>>>,
}

impl CoreState {
    /// File-backed state under the layout's data directory
    pub fn open(
        layout: &DataLayout,
        stats_config: StatsGateConfig,
        risk_config: RiskConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let confidence =
            ConfidenceStore::open(Box::new(JsonFileStore::new(layout.confidence_file())))?;
        let journal: Box<dyn TradeLog> = Box::new(TradeJournal::open(layout.trades_file()));
        let risk = RiskGate::open(
            risk_config,
            Box::new(JsonFileStore::new(layout.risk_state_file())),
            now,
        )?;
        let daily =
            DailyStatsTracker::open(Box::new(JsonFileStore::new(layout.daily_stats_file())), now)?;
        let stats_store = Box::new(JsonFileStore::new(layout.signal_stats_file()));

        let mut state = Self {
            confidence,
            stats: SignalStatsBook::new(stats_config),
            risk,
            daily,
            journal,
            stats_store,
        };
        state.refresh_stats()?;
        info!(
            data_dir = %layout.data_dir().display(),
            prefix = %layout.bot_prefix(),
            "Decision core state loaded"
        );
        Ok(state)
    }

    /// Ephemeral state, nothing touches disk
    pub fn in_memory(stats_config: StatsGateConfig, risk_config: RiskConfig, now: DateTime<Utc>) -> Self {
        Self {
            confidence: ConfidenceStore::in_memory(),
            stats: SignalStatsBook::new(stats_config),
            risk: RiskGate::new(risk_config, now),
            daily: DailyStatsTracker::in_memory(now),
            journal: Box::new(TradeJournal::in_memory()),
            stats_store: Box::new(MemoryStore::new()),
        }
    }

    /// Recompute signal statistics from the journal and persist them
    pub fn refresh_stats(&mut self) -> Result<()> {
        let trades = self.journal.load_trades()?;
        self.stats.recompute(&trades);
        self.stats.save(self.stats_store.as_ref())
    }
}

/// Collaborators injected into the engine
pub struct BotContext {
    pub market: Arc<dyn MarketData>,
    pub account: Arc<dyn Account>,
    /// Dry-run executor
    pub paper: Arc<dyn OrderExecutor>,
    /// Real executor, when configured
    pub live: Option<Arc<dyn OrderExecutor>>,
    pub notifier: Arc<dyn Notifier>,
}

/// Static engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bot_tag: String,
    pub symbols: Vec<String>,
    pub balance_delta_threshold: f64,
    pub report_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bot_tag: "main_bot".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            balance_delta_threshold: 0.001,
            report_interval_secs: 3600,
        }
    }
}

/// What happened to one symbol in a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// Final decision was HOLD
    Hold { raw: Signal, filtered: FilteredSignal },
    /// Symbol still in risk-gate cooldown
    Cooldown { remaining_secs: i64 },
    /// Risk gate refused the trade
    Blocked { reason: BlockReason },
    /// Invalid parameters or unusable execution route; nothing was sent
    Rejected { reason: String },
    /// Executor declined the order
    NotFilled,
    Executed { trade: TradeRecord },
    /// Collaborator or persistence failure, isolated to this symbol
    Failed { error: String },
}

impl SymbolOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, SymbolOutcome::Executed { .. })
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub skipped_disabled: bool,
    pub settled: usize,
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, o)| o)
    }
}

/// Per-bot decision pipeline
pub struct DecisionEngine {
    settings: EngineSettings,
    flags: Arc<BotFlags>,
    indicators: IndicatorEngine,
    filter: SignalFilter,
    core: CoreState,
    ctx: BotContext,
    reconciler: BalanceReconciler,
    schedule: ReportSchedule,
}

impl DecisionEngine {
    pub fn new(
        settings: EngineSettings,
        flags: Arc<BotFlags>,
        indicators: IndicatorEngine,
        filter: SignalFilter,
        core: CoreState,
        ctx: BotContext,
    ) -> Self {
        let reconciler = BalanceReconciler::new(settings.balance_delta_threshold);
        let schedule = ReportSchedule::new(settings.report_interval_secs);
        Self {
            settings,
            flags,
            indicators,
            filter,
            core,
            ctx,
            reconciler,
            schedule,
        }
    }

    pub fn flags(&self) -> Arc<BotFlags> {
        Arc::clone(&self.flags)
    }

    pub fn core(&self) -> &CoreState {
        &self.core
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.ctx.notifier.notify(message).await {
            warn!(error = %e, "Notification failed");
        }
    }

    /// Run one full trading cycle
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        if !self.flags.is_enabled() {
            debug!(bot = %self.settings.bot_tag, "Bot disabled, skipping cycle");
            report.skipped_disabled = true;
            return report;
        }

        if let Some(finished) = self.core.daily.roll(now) {
            self.report_day(&finished).await;
        }

        report.settled = self.reconcile(now).await;

        let mut balance = match self.ctx.account.get_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                error!(error = %e, "Balance unavailable, no trading this cycle");
                None
            }
        };

        if let Some(mut available) = balance {
            let symbols = self.settings.symbols.clone();
            for symbol in symbols {
                let outcome = match self.process_symbol(&symbol, available, now).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "Symbol processing failed");
                        SymbolOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };

                if let SymbolOutcome::Executed { trade } = &outcome {
                    available = self
                        .reconciler
                        .last_balance()
                        .unwrap_or_else(|| (available - trade.price * trade.qty).max(0.0));
                }
                report.outcomes.push((symbol, outcome));
            }
            balance = Some(available);
        }

        for alert in self.core.risk.take_alerts() {
            self.notify(&alert).await;
        }

        if self.schedule.is_due(now) {
            let status = self.status_report(balance, now);
            self.notify(&status.render()).await;
            self.schedule.mark_sent(now);
        }

        report
    }

    /// Decision pipeline for one symbol
    pub async fn process_symbol(
        &mut self,
        symbol: &str,
        balance: f64,
        now: DateTime<Utc>,
    ) -> Result<SymbolOutcome> {
        let candles = self
            .ctx
            .market
            .get_candles(symbol)
            .await
            .map_err(|e| BotError::collaborator("get_candles", e))?;
        let analysis = self.indicators.analyze(&candles);

        let price = match self.ctx.market.get_price(symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Price unavailable, using last close");
                analysis.snapshot.price
            }
        };

        let history = self.core.journal.load_trades()?;
        let input = FilterInput {
            symbol,
            raw: analysis.raw,
            price,
            trend_ema: analysis.snapshot.ema,
            closes: &analysis.closes,
            highs: Some(&analysis.highs),
            lows: Some(&analysis.lows),
            now,
        };
        let filtered = self.filter.apply(&input, &history, &self.core.stats);
        let decision = self.core.confidence.decide(analysis.raw, filtered);

        info!(
            symbol = %symbol,
            price,
            raw = %analysis.raw,
            filtered = %filtered,
            decision = %decision,
            "Signal pipeline"
        );

        let Some(side) = decision.side() else {
            return Ok(SymbolOutcome::Hold {
                raw: analysis.raw,
                filtered,
            });
        };

        if let Some(remaining) = self.core.risk.cooldown_remaining(symbol, now) {
            debug!(symbol = %symbol, remaining_secs = remaining.num_seconds(), "Risk cooldown active");
            return Ok(SymbolOutcome::Cooldown {
                remaining_secs: remaining.num_seconds(),
            });
        }

        if let Err(reason) = self.core.risk.allow_trade(balance, now) {
            info!(symbol = %symbol, reason = %reason, "Trade blocked by risk gate");
            return Ok(SymbolOutcome::Blocked { reason });
        }

        let amount = self.core.risk.compute_trade_amount(balance);
        let bracket = self.core.risk.calc_sl_tp(price, analysis.snapshot.atr, side);
        let mode = self.flags.trading_mode();

        let order = match OrderRequest::new(
            symbol,
            side,
            price,
            balance,
            amount,
            mode,
            bracket.stop_loss,
            bracket.take_profit,
        ) {
            Ok(order) => order,
            Err(BotError::InvalidTrade(reason)) => {
                warn!(symbol = %symbol, %reason, "Order rejected before execution");
                return Ok(SymbolOutcome::Rejected { reason });
            }
            Err(e) => return Err(e),
        };

        let executor = if self.flags.is_live() {
            match &self.ctx.live {
                Some(live) => Arc::clone(live),
                None => {
                    let reason = "live trading enabled but no live executor configured".to_string();
                    warn!(symbol = %symbol, "{}", reason);
                    return Ok(SymbolOutcome::Rejected { reason });
                }
            }
        } else {
            Arc::clone(&self.ctx.paper)
        };

        let fill = executor
            .execute(&order)
            .await
            .map_err(|e| BotError::collaborator("execute", e))?;
        let Some(fill) = fill else {
            info!(symbol = %symbol, executor = executor.name(), "Order not filled");
            return Ok(SymbolOutcome::NotFilled);
        };

        let mut trade = TradeRecord::new(symbol, side, fill.fill_price, fill.qty, now);
        trade.simulated = fill.simulated;
        trade.mode = Some(fill.mode);
        trade.raw_signal = Some(analysis.raw);
        trade.filtered_signal = Some(filtered);
        trade.stop_loss = Some(bracket.stop_loss);
        trade.take_profit = Some(bracket.take_profit);
        trade.order_id = Some(fill.order_id.clone());

        self.core.journal.append_trade(trade.clone())?;
        self.core.risk.mark_trade(symbol, now);
        // pnl realized after this read still shows up as a delta next cycle
        match self.ctx.account.get_balance().await {
            Ok(after) => self.reconciler.rebaseline_to(after),
            Err(e) => {
                warn!(error = %e, "Balance unavailable after order, dropping reconcile baseline");
                self.reconciler.rebaseline();
            }
        }

        info!(
            symbol = %symbol,
            side = %side,
            order_id = %fill.order_id,
            price = fill.fill_price,
            qty = fill.qty,
            amount,
            stop_loss = bracket.stop_loss,
            take_profit = bracket.take_profit,
            simulated = fill.simulated,
            "✅ Trade placed"
        );
        self.notify(&format!(
            "{}{} {} {:.6} @ {:.4} (SL {:.4} / TP {:.4}, {})",
            if fill.simulated { "[DRY-RUN] " } else { "" },
            side,
            symbol,
            fill.qty,
            fill.fill_price,
            bracket.stop_loss,
            bracket.take_profit,
            fill.mode
        ))
        .await;

        Ok(SymbolOutcome::Executed { trade })
    }

    /// Pull realized pnl from the account and settle it. Returns the number
    /// of trades settled.
    pub async fn reconcile(&mut self, now: DateTime<Utc>) -> usize {
        let mut settled = 0;

        if self.ctx.account.reports_closed_pnl() {
            let reports = match self.ctx.account.closed_pnl().await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!(error = %e, "Closed pnl unavailable");
                    return 0;
                }
            };
            for report in reports {
                match self.settle_report(&report, now).await {
                    Ok(true) => settled += 1,
                    Ok(false) => {}
                    Err(e) => error!(symbol = %report.symbol, error = %e, "Settlement failed"),
                }
            }
            return settled;
        }

        let balance = match self.ctx.account.get_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Balance unavailable for reconciliation");
                return 0;
            }
        };
        if let Some(delta) = self.reconciler.observe(balance) {
            match self.settle(None, delta, now).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Settlement failed"),
            }
        }
        settled
    }

    /// Settle an account report on the trade its order opened. Reports
    /// without an order id fall back to the newest open trade of the symbol.
    pub async fn settle_report(&mut self, report: &ClosedPnl, now: DateTime<Utc>) -> Result<bool> {
        let updated = match &report.order_id {
            Some(order_id) => self.core.journal.attach_pnl_for_order(order_id, report.pnl)?,
            None => self
                .core
                .journal
                .attach_pnl_for_symbol(&report.symbol, report.pnl)?,
        };
        let Some(trade) = updated else {
            warn!(
                pnl = report.pnl,
                symbol = %report.symbol,
                order_id = ?report.order_id,
                "No matching trade awaiting pnl, ignoring"
            );
            return Ok(false);
        };
        self.apply_settlement(trade, report.pnl, now).await?;
        Ok(true)
    }

    /// Attach pnl to the newest eligible trade and feed it back
    pub async fn settle(&mut self, symbol: Option<&str>, pnl: f64, now: DateTime<Utc>) -> Result<bool> {
        let updated = match symbol {
            Some(symbol) => self.core.journal.attach_pnl_for_symbol(symbol, pnl)?,
            None => self.core.journal.attach_pnl(pnl)?,
        };
        let Some(trade) = updated else {
            warn!(pnl, symbol = ?symbol, "No trade awaiting pnl, ignoring");
            return Ok(false);
        };
        self.apply_settlement(trade, pnl, now).await?;
        Ok(true)
    }

    async fn apply_settlement(&mut self, trade: TradeRecord, pnl: f64, now: DateTime<Utc>) -> Result<()> {
        if pnl != 0.0 {
            if let Err(e) = self.core.confidence.feedback(pnl > 0.0, trade.side.signal()) {
                error!(error = %e, "Confidence feedback not persisted");
            }
        }
        self.core.risk.record_trade_result(pnl, now);
        let finished = self.core.daily.record(pnl, now);
        self.core.refresh_stats()?;

        self.notify(&format!(
            "{} {} {} settled: pnl {:+.4} USDT",
            if pnl > 0.0 { "🟢" } else { "🔴" },
            trade.side,
            trade.symbol,
            pnl
        ))
        .await;
        if let Some(finished) = finished {
            self.report_day(&finished).await;
        }
        Ok(())
    }

    async fn report_day(&self, finished: &DailyStats) {
        if finished.total_trades > 0 {
            self.notify(&finished.render()).await;
        }
    }

    pub fn status_report(&self, balance: Option<f64>, now: DateTime<Utc>) -> StatusReport {
        let recent_trades = match self.core.journal.load_trades() {
            Ok(trades) => {
                let skip = trades.len().saturating_sub(RECENT_TRADES_IN_REPORT);
                trades.into_iter().skip(skip).collect()
            }
            Err(e) => {
                warn!(error = %e, "Trade journal unavailable for report");
                Vec::new()
            }
        };

        StatusReport {
            bot_tag: self.settings.bot_tag.clone(),
            generated_at: now,
            balance,
            enabled: self.flags.is_enabled(),
            live: self.flags.is_live(),
            mode: self.flags.trading_mode(),
            risk: self.core.risk.state(),
            daily: self.core.daily.current().clone(),
            confidence: self.core.confidence.state().clone(),
            recent_trades,
        }
    }
}
