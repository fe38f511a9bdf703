//! Risk Gate - Daily limits, cooldowns and position sizing
//!
//! Implements:
//! - Rolling 24h window with OPEN/BLOCKED states
//! - Daily loss limits (fraction of balance and optional fixed USDT cap)
//! - Max trades per day and max consecutive losses
//! - Per-symbol cooldown after a trade
//! - Trade-count de-rated position sizing
//! - ATR-adaptive stop-loss/take-profit with percentage floors
//!
//! - Per-UTC-day trade summary ([`daily`])
//!
//! State can be persisted so daily limits survive restarts; a snapshot whose
//! window already expired is discarded on restore.

pub mod daily;

pub use daily::{DailyStats, DailyStatsTracker};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::persistence::StateStore;
use crate::types::Side;

/// Risk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Block once the window's loss reaches this fraction of balance
    pub max_daily_loss_fraction: f64,
    /// Fixed USDT loss cap, disabled when 0
    pub max_daily_loss_usdt: f64,
    pub max_trades_per_day: u32,
    pub max_consecutive_losses: u32,
    /// Per-symbol cooldown after a placed trade (seconds)
    pub cooldown_secs: i64,
    /// Fraction of balance risked per trade before de-rating
    pub risk_per_trade: f64,
    /// Minimum order size (USDT)
    pub min_position_size: f64,
    /// Maximum order size as a fraction of balance
    pub max_position_fraction: f64,
    /// Stop-loss never nearer than this fraction from entry
    pub min_stop_pct: f64,
    /// Take-profit never nearer than this fraction from entry
    pub min_take_profit_pct: f64,
    /// Take-profit distance as a multiple of stop distance
    pub take_profit_ratio: f64,
    pub window_hours: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_fraction: 0.10,
            max_daily_loss_usdt: 0.0,
            max_trades_per_day: 5,
            max_consecutive_losses: 3,
            cooldown_secs: 300,
            risk_per_trade: 0.01,
            min_position_size: 5.0,
            max_position_fraction: 0.10,
            min_stop_pct: 0.02,
            min_take_profit_pct: 0.03,
            take_profit_ratio: 1.8,
            window_hours: 24,
        }
    }
}

/// Why a trade was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    NoBalance,
    DailyLossLimit { loss: f64, limit: f64 },
    DailyLossCap { loss: f64, cap: f64 },
    MaxTrades { count: u32, max: u32 },
    ConsecutiveLosses { streak: u32, max: u32 },
}

impl BlockReason {
    /// Reasons that put the gate into BLOCKED until the window resets
    pub fn is_window_block(&self) -> bool {
        !matches!(self, BlockReason::NoBalance)
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::NoBalance => write!(f, "No balance available"),
            BlockReason::DailyLossLimit { loss, limit } => {
                write!(f, "Daily loss limit reached: ${:.2} (max ${:.2})", loss, limit)
            }
            BlockReason::DailyLossCap { loss, cap } => {
                write!(f, "Daily loss cap reached: ${:.2} (cap ${:.2})", loss, cap)
            }
            BlockReason::MaxTrades { count, max } => {
                write!(f, "Max trades per day reached: {} (max {})", count, max)
            }
            BlockReason::ConsecutiveLosses { streak, max } => {
                write!(f, "Consecutive losses: {} (max {})", streak, max)
            }
        }
    }
}

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Blocked,
}

/// Counters for the current 24h window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub window_start: DateTime<Utc>,
    /// Sum of losses in the window (positive number)
    pub cumulative_loss: f64,
    pub trade_count: u32,
    pub consecutive_losses: u32,
    pub blocked: bool,
    #[serde(default)]
    pub block_reason: Option<BlockReason>,
}

impl DailyRiskState {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            cumulative_loss: 0.0,
            trade_count: 0,
            consecutive_losses: 0,
            blocked: false,
            block_reason: None,
        }
    }

    pub fn gate_state(&self) -> GateState {
        if self.blocked {
            GateState::Blocked
        } else {
            GateState::Open
        }
    }
}

/// Persisted form of the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub state: DailyRiskState,
    #[serde(default)]
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
}

/// Stop-loss / take-profit levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub stop_distance: f64,
    pub take_profit_distance: f64,
}

struct Inner {
    state: DailyRiskState,
    cooldowns: BTreeMap<String, DateTime<Utc>>,
    last_balance: f64,
    alerts: Vec<String>,
}

/// Risk gate authorizing every order
pub struct RiskGate {
    config: RiskConfig,
    inner: RwLock<Inner>,
    store: Option<Box<dyn StateStore<RiskSnapshot>>>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: DailyRiskState::new(now),
                cooldowns: BTreeMap::new(),
                last_balance: 0.0,
                alerts: Vec::new(),
            }),
            store: None,
        }
    }

    /// Gate backed by a persisted snapshot
    pub fn open(
        config: RiskConfig,
        store: Box<dyn StateStore<RiskSnapshot>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(BotError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Risk state corrupt, starting fresh window");
                None
            }
            Err(e) => return Err(e),
        };

        let mut gate = Self::new(config, now);
        gate.store = Some(store);
        if let Some(snapshot) = snapshot {
            gate.restore(snapshot, now);
        }
        gate.persist();
        Ok(gate)
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self) -> Duration {
        Duration::hours(self.config.window_hours)
    }

    /// Restore a snapshot, discarding counters from an expired window
    pub fn restore(&self, snapshot: RiskSnapshot, now: DateTime<Utc>) {
        let cooldown = Duration::seconds(self.config.cooldown_secs);
        let mut inner = self.write();

        if now > snapshot.state.window_start + self.window() {
            info!(
                window_start = %snapshot.state.window_start,
                "Persisted risk window expired, starting fresh"
            );
            inner.state = DailyRiskState::new(now);
        } else {
            info!(
                window_start = %snapshot.state.window_start,
                trades = snapshot.state.trade_count,
                loss = snapshot.state.cumulative_loss,
                blocked = snapshot.state.blocked,
                "Resuming persisted risk window"
            );
            inner.state = snapshot.state;
        }

        inner.cooldowns = snapshot
            .cooldowns
            .into_iter()
            .filter(|(_, at)| now - *at < cooldown)
            .collect();
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let inner = self.read();
        RiskSnapshot {
            state: inner.state.clone(),
            cooldowns: inner.cooldowns.clone(),
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.snapshot()) {
            warn!(error = %e, "Failed to persist risk state");
        }
    }

    /// Reset counters if the window expired. Returns true on reset.
    fn roll_window(&self, inner: &mut Inner, now: DateTime<Utc>) -> bool {
        if now > inner.state.window_start + self.window() {
            info!(
                previous_start = %inner.state.window_start,
                trades = inner.state.trade_count,
                loss = inner.state.cumulative_loss,
                "Risk window reset"
            );
            inner.state = DailyRiskState::new(now);
            true
        } else {
            false
        }
    }

    fn check_limits(&self, state: &DailyRiskState, balance: f64) -> Option<BlockReason> {
        let cfg = &self.config;

        if balance > 0.0 {
            let limit = cfg.max_daily_loss_fraction * balance;
            if state.cumulative_loss >= limit {
                return Some(BlockReason::DailyLossLimit {
                    loss: state.cumulative_loss,
                    limit,
                });
            }
        }
        if cfg.max_daily_loss_usdt > 0.0 && state.cumulative_loss >= cfg.max_daily_loss_usdt {
            return Some(BlockReason::DailyLossCap {
                loss: state.cumulative_loss,
                cap: cfg.max_daily_loss_usdt,
            });
        }
        if state.trade_count >= cfg.max_trades_per_day {
            return Some(BlockReason::MaxTrades {
                count: state.trade_count,
                max: cfg.max_trades_per_day,
            });
        }
        if state.consecutive_losses >= cfg.max_consecutive_losses {
            return Some(BlockReason::ConsecutiveLosses {
                streak: state.consecutive_losses,
                max: cfg.max_consecutive_losses,
            });
        }
        None
    }

    /// OPEN -> BLOCKED; queues exactly one alert per block
    fn block(inner: &mut Inner, reason: BlockReason) {
        if inner.state.blocked {
            return;
        }
        warn!(reason = %reason, "Risk gate blocked");
        inner.alerts.push(format!("Trading blocked: {}", reason));
        inner.state.blocked = true;
        inner.state.block_reason = Some(reason);
    }

    /// Authorize a trade at the given balance
    pub fn allow_trade(&self, balance: f64, now: DateTime<Utc>) -> std::result::Result<(), BlockReason> {
        let (verdict, changed) = {
            let mut inner = self.write();
            let mut changed = self.roll_window(&mut inner, now);

            let verdict = if balance <= 0.0 {
                Err(BlockReason::NoBalance)
            } else {
                inner.last_balance = balance;
                if inner.state.blocked {
                    Err(inner
                        .state
                        .block_reason
                        .clone()
                        .unwrap_or(BlockReason::NoBalance))
                } else if let Some(reason) = self.check_limits(&inner.state, balance) {
                    Self::block(&mut inner, reason.clone());
                    changed = true;
                    Err(reason)
                } else {
                    Ok(())
                }
            };
            (verdict, changed)
        };

        if changed {
            self.persist();
        }
        if let Err(reason) = &verdict {
            debug!(balance, reason = %reason, "Trade not allowed");
        }
        verdict
    }

    /// Fold a settled trade into the window counters
    pub fn record_trade_result(&self, pnl: f64, now: DateTime<Utc>) {
        {
            let mut inner = self.write();
            self.roll_window(&mut inner, now);

            if pnl < 0.0 {
                inner.state.cumulative_loss += -pnl;
                inner.state.consecutive_losses += 1;
            } else {
                inner.state.consecutive_losses = 0;
            }
            inner.state.trade_count += 1;

            info!(
                pnl,
                trades = inner.state.trade_count,
                loss = inner.state.cumulative_loss,
                streak = inner.state.consecutive_losses,
                "Trade result recorded"
            );

            let balance = inner.last_balance;
            if let Some(reason) = self.check_limits(&inner.state, balance) {
                Self::block(&mut inner, reason);
            }
        }
        self.persist();
    }

    /// Start the per-symbol cooldown
    pub fn mark_trade(&self, symbol: &str, now: DateTime<Utc>) {
        self.write().cooldowns.insert(symbol.to_string(), now);
        self.persist();
    }

    /// Remaining cooldown for a symbol, if any
    pub fn cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let inner = self.read();
        let last = inner.cooldowns.get(symbol)?;
        let until = *last + Duration::seconds(self.config.cooldown_secs);
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(symbol, now).is_some()
    }

    /// Position size in USDT, de-rated as the daily trade budget is used
    pub fn compute_trade_amount(&self, balance: f64) -> f64 {
        let cfg = &self.config;
        let used = if cfg.max_trades_per_day == 0 {
            1.0
        } else {
            (self.read().state.trade_count as f64 / cfg.max_trades_per_day as f64).min(1.0)
        };
        let risk_factor = 1.0 - 0.5 * used;
        let base = balance * cfg.risk_per_trade * risk_factor;

        base.min(balance * cfg.max_position_fraction)
            .max(cfg.min_position_size)
    }

    /// Volatility-adaptive bracket with percentage floors
    pub fn calc_sl_tp(&self, price: f64, atr: f64, side: Side) -> Bracket {
        let cfg = &self.config;
        let multiplier = (atr * 1000.0).clamp(1.5, 3.0);
        let stop_distance = atr * multiplier;
        let take_profit_distance = stop_distance * cfg.take_profit_ratio;

        let (stop_loss, take_profit) = match side {
            Side::Buy => (
                (price - stop_distance).min(price * (1.0 - cfg.min_stop_pct)),
                (price + take_profit_distance).max(price * (1.0 + cfg.min_take_profit_pct)),
            ),
            Side::Sell => (
                (price + stop_distance).max(price * (1.0 + cfg.min_stop_pct)),
                (price - take_profit_distance).min(price * (1.0 - cfg.min_take_profit_pct)),
            ),
        };

        Bracket {
            stop_loss,
            take_profit,
            stop_distance,
            take_profit_distance,
        }
    }

    /// Drain pending block alerts
    pub fn take_alerts(&self) -> Vec<String> {
        std::mem::take(&mut self.write().alerts)
    }

    pub fn state(&self) -> DailyRiskState {
        self.read().state.clone()
    }

    pub fn gate_state(&self) -> GateState {
        self.read().state.gate_state()
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new(RiskConfig::default(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_trade_amount_clamped_to_minimum() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        assert!((gate.compute_trade_amount(100.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_amount_derates_with_trade_count() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        // 10_000 * 0.01 = 100, under the 10% cap of 1000
        assert!((gate.compute_trade_amount(10_000.0) - 100.0).abs() < 1e-9);

        gate.record_trade_result(1.0, t0());
        gate.record_trade_result(1.0, t0());
        // 2 of 5 used -> factor 0.8
        assert!((gate.compute_trade_amount(10_000.0) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_amount_capped_at_max_fraction() {
        let config = RiskConfig {
            risk_per_trade: 0.5,
            ..Default::default()
        };
        let gate = RiskGate::new(config, t0());
        assert!((gate.compute_trade_amount(1000.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_floor_dominates_small_atr() {
        let gate = RiskGate::default();
        let b = gate.calc_sl_tp(100.0, 0.002, Side::Buy);
        assert!((b.stop_distance - 0.004).abs() < 1e-12);
        assert!((b.stop_loss - 98.0).abs() < 1e-9);
        assert!((b.take_profit - 103.0).abs() < 1e-9);

        let s = gate.calc_sl_tp(100.0, 0.002, Side::Sell);
        assert!((s.stop_loss - 102.0).abs() < 1e-9);
        assert!((s.take_profit - 97.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_atr_uses_atr_distance() {
        let gate = RiskGate::default();
        // multiplier clamps at 3.0 -> stop 15, tp 27
        let b = gate.calc_sl_tp(100.0, 5.0, Side::Buy);
        assert!((b.stop_loss - 85.0).abs() < 1e-9);
        assert!((b.take_profit - 127.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_balance_rejected() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        assert_eq!(gate.allow_trade(0.0, t0()), Err(BlockReason::NoBalance));
        assert_eq!(gate.gate_state(), GateState::Open);
    }

    #[test]
    fn test_consecutive_losses_block_until_window_reset() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        assert!(gate.allow_trade(1000.0, t0()).is_ok());

        for _ in 0..3 {
            gate.record_trade_result(-1.0, t0());
        }
        assert_eq!(gate.gate_state(), GateState::Blocked);
        assert!(matches!(
            gate.allow_trade(1000.0, t0()),
            Err(BlockReason::ConsecutiveLosses { streak: 3, max: 3 })
        ));

        // a win resets the streak but not the block
        gate.record_trade_result(0.0, t0());
        assert_eq!(gate.state().consecutive_losses, 0);
        assert!(gate.allow_trade(1000.0, t0()).is_err());

        let later = t0() + Duration::hours(25);
        assert!(gate.allow_trade(1000.0, later).is_ok());
        let state = gate.state();
        assert_eq!(state.trade_count, 0);
        assert_eq!(state.cumulative_loss, 0.0);
        assert!(!state.blocked);
        assert!(state.block_reason.is_none());
    }

    #[test]
    fn test_single_alert_per_block() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        assert!(gate.allow_trade(100.0, t0()).is_ok());
        gate.record_trade_result(-20.0, t0());
        for _ in 0..5 {
            assert!(gate.allow_trade(100.0, t0()).is_err());
        }
        let alerts = gate.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Daily loss limit"));
        assert!(gate.take_alerts().is_empty());
    }

    #[test]
    fn test_limits_checked_eagerly_in_allow_trade() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        // no balance known yet, so the fraction check cannot fire on record
        gate.record_trade_result(-12.0, t0());
        assert_eq!(gate.gate_state(), GateState::Open);

        let verdict = gate.allow_trade(100.0, t0());
        assert!(matches!(verdict, Err(BlockReason::DailyLossLimit { .. })));
        assert_eq!(gate.gate_state(), GateState::Blocked);
    }

    #[test]
    fn test_fixed_usdt_cap() {
        let config = RiskConfig {
            max_daily_loss_usdt: 3.0,
            ..Default::default()
        };
        let gate = RiskGate::new(config, t0());
        gate.record_trade_result(-2.0, t0());
        gate.record_trade_result(1.0, t0());
        gate.record_trade_result(-1.5, t0());
        assert!(matches!(
            gate.allow_trade(10_000.0, t0()),
            Err(BlockReason::DailyLossCap { .. })
        ));
    }

    #[test]
    fn test_max_trades_per_day() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        for _ in 0..5 {
            assert!(gate.allow_trade(1000.0, t0()).is_ok());
            gate.record_trade_result(1.0, t0());
        }
        assert!(matches!(
            gate.allow_trade(1000.0, t0()),
            Err(BlockReason::MaxTrades { count: 5, max: 5 })
        ));
    }

    #[test]
    fn test_symbol_cooldown() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        gate.mark_trade("BTCUSDT", t0());
        assert!(gate.in_cooldown("BTCUSDT", t0() + Duration::seconds(299)));
        assert!(!gate.in_cooldown("BTCUSDT", t0() + Duration::seconds(300)));
        assert!(!gate.in_cooldown("ETHUSDT", t0()));
    }

    #[test]
    fn test_persisted_state_resumes_or_expires() {
        let store = MemoryStore::<RiskSnapshot>::new();
        let gate = RiskGate::open(RiskConfig::default(), Box::new(store), t0()).unwrap();
        gate.record_trade_result(-1.0, t0());
        gate.mark_trade("BTCUSDT", t0());
        let snapshot = gate.snapshot();

        let resumed = RiskGate::open(
            RiskConfig::default(),
            Box::new(MemoryStore::with_value(snapshot.clone())),
            t0() + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(resumed.state().trade_count, 1);
        assert_eq!(resumed.state().consecutive_losses, 1);
        assert!(!resumed.in_cooldown("BTCUSDT", t0() + Duration::hours(1)));

        let expired = RiskGate::open(
            RiskConfig::default(),
            Box::new(MemoryStore::with_value(snapshot)),
            t0() + Duration::hours(30),
        )
        .unwrap();
        assert_eq!(expired.state().trade_count, 0);
        assert_eq!(expired.state().window_start, t0() + Duration::hours(30));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let gate = RiskGate::new(RiskConfig::default(), t0());
        for _ in 0..3 {
            gate.record_trade_result(-1.0, t0());
        }
        let json = serde_json::to_value(gate.snapshot()).unwrap();
        assert_eq!(json["state"]["blocked"], true);
        assert_eq!(json["state"]["block_reason"]["kind"], "CONSECUTIVE_LOSSES");
    }
}
