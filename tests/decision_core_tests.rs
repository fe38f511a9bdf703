//! End-to-end tests for the decision pipeline

#[cfg(test)]
mod tests {
    use aitrader::engine::{
        BotContext, BotFlags, CoreState, DecisionEngine, EngineSettings, Notifier, SymbolOutcome,
    };
    use aitrader::exchange::{Account, MarketData, OrderExecutor};
    use aitrader::features::IndicatorEngine;
    use aitrader::paper_trading::{PaperConfig, PaperExchange};
    use aitrader::persistence::TradeLog;
    use aitrader::risk::{BlockReason, RiskConfig};
    use aitrader::strategy::{SignalFilter, StatsGateConfig};
    use aitrader::types::{
        Candle, ClosedPnl, ExecutionOutcome, OrderRequest, Side, Signal, TradeRecord, TradingMode,
    };
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    // ============================================================================
    // Fakes
    // ============================================================================

    /// Accelerating uptrend with a +/-3 zigzag; yields a raw BUY
    fn uptrend() -> Vec<Candle> {
        (0..60)
            .map(|i| {
                let zig = if i % 2 == 0 { 3.0 } else { -3.0 };
                let close = 100.0 + 0.02 * (i * i) as f64 + zig;
                Candle {
                    open_time: i as i64 * 60_000,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                    turnover: 10.0 * close,
                }
            })
            .collect()
    }

    struct FakeMarket {
        candles: HashMap<String, Vec<Candle>>,
        price_override: Mutex<Option<f64>>,
    }

    impl FakeMarket {
        fn trending(symbols: &[&str]) -> Self {
            Self {
                candles: symbols.iter().map(|s| (s.to_string(), uptrend())).collect(),
                price_override: Mutex::new(None),
            }
        }

        fn set_price(&self, price: f64) {
            *self.price_override.lock().unwrap() = Some(price);
        }
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn get_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
            self.candles
                .get(symbol)
                .cloned()
                .ok_or_else(|| anyhow!("no market for {}", symbol))
        }

        async fn get_price(&self, symbol: &str) -> Result<f64> {
            let overridden = *self.price_override.lock().unwrap();
            if let Some(price) = overridden {
                return Ok(price);
            }
            let candles = self.get_candles(symbol).await?;
            candles
                .last()
                .map(|c| c.close)
                .ok_or_else(|| anyhow!("empty series"))
        }
    }

    struct FakeAccount {
        balance: Mutex<f64>,
        authoritative: bool,
        reports: Mutex<Vec<ClosedPnl>>,
    }

    impl FakeAccount {
        fn new(balance: f64, authoritative: bool) -> Self {
            Self {
                balance: Mutex::new(balance),
                authoritative,
                reports: Mutex::new(Vec::new()),
            }
        }

        fn set_balance(&self, balance: f64) {
            *self.balance.lock().unwrap() = balance;
        }

        fn push_closed(&self, symbol: &str, pnl: f64) {
            self.reports.lock().unwrap().push(ClosedPnl {
                symbol: symbol.to_string(),
                order_id: None,
                pnl,
                closed_at: Utc::now(),
            });
        }
    }

    #[async_trait]
    impl Account for FakeAccount {
        async fn get_balance(&self) -> Result<f64> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn closed_pnl(&self) -> Result<Vec<ClosedPnl>> {
            Ok(std::mem::take(&mut *self.reports.lock().unwrap()))
        }

        fn reports_closed_pnl(&self) -> bool {
            self.authoritative
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        orders: Mutex<Vec<OrderRequest>>,
    }

    impl RecordingExecutor {
        fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OrderExecutor for RecordingExecutor {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn execute(&self, order: &OrderRequest) -> Result<Option<ExecutionOutcome>> {
            self.orders.lock().unwrap().push(order.clone());
            Ok(Some(ExecutionOutcome {
                order_id: format!("sim-{}", self.order_count()),
                symbol: order.symbol.clone(),
                side: order.side,
                fill_price: order.price,
                qty: order.qty,
                mode: order.mode,
                simulated: true,
                fee: 0.0,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn containing(&self, needle: &str) -> usize {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str) -> Result<()> {
            Err(anyhow!("telegram unreachable"))
        }
    }

    struct Harness {
        engine: DecisionEngine,
        executor: Arc<RecordingExecutor>,
        notifier: Arc<RecordingNotifier>,
        flags: Arc<BotFlags>,
    }

    fn harness(
        symbols: &[&str],
        market: Arc<dyn MarketData>,
        account: Arc<dyn Account>,
        risk: RiskConfig,
        now: DateTime<Utc>,
    ) -> Harness {
        let executor = Arc::new(RecordingExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let flags = Arc::new(BotFlags::new(true, false, TradingMode::Spot));

        let settings = EngineSettings {
            bot_tag: "test_bot".to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            balance_delta_threshold: 0.001,
            report_interval_secs: 0,
        };
        let ctx = BotContext {
            market,
            account,
            paper: executor.clone(),
            live: None,
            notifier: notifier.clone(),
        };
        let engine = DecisionEngine::new(
            settings,
            Arc::clone(&flags),
            IndicatorEngine::default(),
            SignalFilter::default(),
            CoreState::in_memory(StatsGateConfig::default(), risk, now),
            ctx,
        );

        Harness {
            engine,
            executor,
            notifier,
            flags,
        }
    }

    // ============================================================================
    // Cycle behaviour
    // ============================================================================

    #[tokio::test]
    async fn test_disabled_bot_skips_cycle() {
        let now = Utc::now();
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            Arc::new(FakeAccount::new(1000.0, false)),
            RiskConfig::default(),
            now,
        );
        h.flags.stop();

        let report = h.engine.run_cycle(now).await;
        assert!(report.skipped_disabled);
        assert!(report.outcomes.is_empty());
        assert_eq!(h.executor.order_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_buy_is_executed_and_journaled() {
        let now = Utc::now();
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            Arc::new(FakeAccount::new(1000.0, false)),
            RiskConfig::default(),
            now,
        );

        let report = h.engine.run_cycle(now).await;
        let outcome = report.outcome("BTCUSDT").unwrap();
        assert!(outcome.is_executed(), "got {:?}", outcome);

        let orders = h.executor.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.side, Side::Buy);
        // 1% of balance at an unused trade budget
        assert!((order.amount_usdt - 10.0).abs() < 1e-9);
        assert!(order.stop_loss < order.price && order.take_profit > order.price);

        let trades = h.engine.core().journal.load_trades().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].pnl, None);
        assert!(trades[0].simulated);
        assert_eq!(trades[0].raw_signal, Some(Signal::Buy));

        assert!(h.engine.core().risk.in_cooldown("BTCUSDT", now));
        assert_eq!(h.notifier.containing("BUY BTCUSDT"), 1);
    }

    #[tokio::test]
    async fn test_live_without_executor_is_rejected() {
        let now = Utc::now();
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            Arc::new(FakeAccount::new(1000.0, false)),
            RiskConfig::default(),
            now,
        );
        h.flags.set_live(true);

        let report = h.engine.run_cycle(now).await;
        assert!(matches!(
            report.outcome("BTCUSDT"),
            Some(SymbolOutcome::Rejected { .. })
        ));
        assert_eq!(h.executor.order_count(), 0);
        assert!(h.engine.core().journal.load_trades().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_symbol_does_not_stop_the_cycle() {
        let now = Utc::now();
        let mut h = harness(
            &["BROKENUSDT", "BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            Arc::new(FakeAccount::new(1000.0, false)),
            RiskConfig::default(),
            now,
        );

        let report = h.engine.run_cycle(now).await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcome("BROKENUSDT"),
            Some(SymbolOutcome::Failed { .. })
        ));
        assert!(report.outcome("BTCUSDT").unwrap().is_executed());
    }

    // ============================================================================
    // Settlement
    // ============================================================================

    #[tokio::test]
    async fn test_closed_pnl_settles_trade_and_feeds_back() {
        let now = Utc::now();
        let account = Arc::new(FakeAccount::new(1000.0, true));
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            account.clone(),
            RiskConfig::default(),
            now,
        );

        h.engine.run_cycle(now).await;
        account.push_closed("BTCUSDT", -2.0);

        let later = now + Duration::seconds(30);
        let report = h.engine.run_cycle(later).await;
        assert_eq!(report.settled, 1);
        // same symbol is still cooling down
        assert!(matches!(
            report.outcome("BTCUSDT"),
            Some(SymbolOutcome::Cooldown { .. })
        ));

        let trades = h.engine.core().journal.load_trades().unwrap();
        assert_eq!(trades[0].pnl, Some(-2.0));

        let core = h.engine.core();
        assert!((core.confidence.get(Signal::Buy) - 0.95).abs() < 1e-9);
        let risk = core.risk.state();
        assert_eq!(risk.trade_count, 1);
        assert_eq!(risk.consecutive_losses, 1);
        assert!((risk.cumulative_loss - 2.0).abs() < 1e-9);
        assert_eq!(core.stats.get("BTCUSDT", Signal::Buy).unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_balance_delta_settles_when_account_has_no_reports() {
        let now = Utc::now();
        let account = Arc::new(FakeAccount::new(1000.0, false));
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            account.clone(),
            RiskConfig::default(),
            now,
        );

        let first = h.engine.run_cycle(now).await;
        assert!(first.outcome("BTCUSDT").unwrap().is_executed());

        // position closes between cycles
        account.set_balance(1003.0);
        let second = h.engine.run_cycle(now + Duration::seconds(30)).await;
        assert_eq!(second.settled, 1);

        let trades = h.engine.core().journal.load_trades().unwrap();
        assert_eq!(trades[0].pnl, Some(3.0));
        assert!((h.engine.core().confidence.get(Signal::Buy) - 1.05).abs() < 1e-9);

        // nothing left to settle
        account.set_balance(1001.0);
        assert_eq!(h.engine.reconcile(now + Duration::seconds(60)).await, 0);
    }

    #[tokio::test]
    async fn test_closed_report_settles_its_own_order_not_the_newest() {
        let now = Utc::now();
        let market = Arc::new(FakeMarket::trending(&["BTCUSDT"]));
        let paper = Arc::new(
            PaperExchange::new(PaperConfig {
                initial_balance: 1000.0,
                slippage_bps: 0.0,
                fee_bps: 0.0,
                futures_leverage: 9.0,
            })
            .with_prices(market.clone()),
        );
        let mut h = harness(&["BTCUSDT"], market.clone(), paper.clone(), RiskConfig::default(), now);

        // BUY opened first, SELL second, both on one symbol
        for (side, stop_loss, take_profit) in [(Side::Buy, 98.0, 103.0), (Side::Sell, 102.0, 97.0)] {
            let order = OrderRequest::new(
                "BTCUSDT",
                side,
                100.0,
                1000.0,
                10.0,
                TradingMode::Spot,
                stop_loss,
                take_profit,
            )
            .unwrap();
            let fill = paper.execute(&order).await.unwrap().unwrap();
            let mut trade = TradeRecord::new("BTCUSDT", side, fill.fill_price, fill.qty, now);
            trade.order_id = Some(fill.order_id);
            h.engine.core().journal.append_trade(trade).unwrap();
        }

        // stops the BUY, leaves the SELL short of its target
        market.set_price(97.5);
        assert_eq!(h.engine.reconcile(now).await, 1);

        let trades = h.engine.core().journal.load_trades().unwrap();
        assert_eq!(trades[0].side, Side::Buy);
        assert!((trades[0].pnl.unwrap() + 0.25).abs() < 1e-9);
        assert_eq!(trades[1].pnl, None);

        let core = h.engine.core();
        assert!((core.confidence.get(Signal::Buy) - 0.95).abs() < 1e-9);
        assert!((core.confidence.get(Signal::Sell) - 1.0).abs() < 1e-9);
        assert_eq!(paper.open_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_undo_trade() {
        let now = Utc::now();
        let executor = Arc::new(RecordingExecutor::default());
        let ctx = BotContext {
            market: Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            account: Arc::new(FakeAccount::new(1000.0, false)),
            paper: executor.clone(),
            live: None,
            notifier: Arc::new(FailingNotifier),
        };
        let settings = EngineSettings {
            symbols: vec!["BTCUSDT".to_string()],
            report_interval_secs: 60,
            ..EngineSettings::default()
        };
        let mut engine = DecisionEngine::new(
            settings,
            Arc::new(BotFlags::default()),
            IndicatorEngine::default(),
            SignalFilter::default(),
            CoreState::in_memory(StatsGateConfig::default(), RiskConfig::default(), now),
            ctx,
        );

        let report = engine.run_cycle(now).await;
        assert!(report.outcome("BTCUSDT").unwrap().is_executed());
        assert_eq!(executor.order_count(), 1);

        let trades = engine.core().journal.load_trades().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].order_id.as_deref(), Some("sim-1"));
        assert!(engine.core().risk.in_cooldown("BTCUSDT", now));
    }

    #[tokio::test]
    async fn test_daily_report_sent_when_utc_day_changes() {
        let evening = DateTime::parse_from_rfc3339("2024-03-01T23:58:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let account = Arc::new(FakeAccount::new(1000.0, true));
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            account.clone(),
            RiskConfig::default(),
            evening,
        );

        h.engine.run_cycle(evening).await;
        account.push_closed("BTCUSDT", -2.0);
        h.engine.run_cycle(evening + Duration::seconds(30)).await;

        let today = h.engine.core().daily.current().clone();
        assert_eq!(today.total_trades, 1);
        assert_eq!(today.worst_trade, Some(-2.0));
        assert_eq!(h.notifier.containing("Daily report"), 0);

        h.engine.run_cycle(evening + Duration::minutes(3)).await;
        assert_eq!(h.notifier.containing("Daily report 2024-03-01"), 1);
        let fresh = h.engine.core().daily.current();
        assert_eq!(fresh.date.to_string(), "2024-03-02");
        assert_eq!(fresh.total_trades, 0);

        // an empty day finishes silently
        h.engine.run_cycle(evening + Duration::days(1) + Duration::minutes(3)).await;
        assert_eq!(h.notifier.containing("Daily report"), 1);
    }

    #[tokio::test]
    async fn test_risk_block_alerts_once() {
        let now = Utc::now();
        let account = Arc::new(FakeAccount::new(1000.0, true));
        let risk = RiskConfig {
            max_consecutive_losses: 1,
            cooldown_secs: 0,
            ..RiskConfig::default()
        };
        let mut h = harness(
            &["BTCUSDT"],
            Arc::new(FakeMarket::trending(&["BTCUSDT"])),
            account.clone(),
            risk,
            now,
        );

        h.engine.run_cycle(now).await;
        account.push_closed("BTCUSDT", -1.0);

        for step in 1..=3 {
            let report = h.engine.run_cycle(now + Duration::seconds(step)).await;
            assert!(matches!(
                report.outcome("BTCUSDT"),
                Some(SymbolOutcome::Blocked {
                    reason: BlockReason::ConsecutiveLosses { .. }
                })
            ));
        }

        assert_eq!(h.executor.order_count(), 1);
        assert_eq!(h.notifier.containing("Trading blocked"), 1);
    }

    #[tokio::test]
    async fn test_paper_exchange_settles_stop_loss_end_to_end() {
        let now = Utc::now();
        let market = Arc::new(FakeMarket::trending(&["BTCUSDT"]));
        let paper = Arc::new(PaperExchange::new(PaperConfig::default()).with_prices(market.clone()));
        let notifier = Arc::new(RecordingNotifier::default());

        let ctx = BotContext {
            market: market.clone(),
            account: paper.clone(),
            paper: paper.clone(),
            live: None,
            notifier: notifier.clone(),
        };
        let settings = EngineSettings {
            symbols: vec!["BTCUSDT".to_string()],
            report_interval_secs: 0,
            ..EngineSettings::default()
        };
        let mut engine = DecisionEngine::new(
            settings,
            Arc::new(BotFlags::default()),
            IndicatorEngine::default(),
            SignalFilter::default(),
            CoreState::in_memory(StatsGateConfig::default(), RiskConfig::default(), now),
            ctx,
        );

        let first = engine.run_cycle(now).await;
        assert!(first.outcome("BTCUSDT").unwrap().is_executed());
        assert_eq!(paper.open_positions().len(), 1);

        // far below any stop-loss
        market.set_price(100.0);
        let second = engine.run_cycle(now + Duration::seconds(60)).await;
        assert_eq!(second.settled, 1);
        assert!(paper.open_positions().is_empty());

        let trades = engine.core().journal.load_trades().unwrap();
        assert!(trades[0].pnl.unwrap() < 0.0);
        assert!((engine.core().confidence.get(Signal::Buy) - 0.95).abs() < 1e-9);
        assert_eq!(notifier.containing("settled"), 1);
    }
}
