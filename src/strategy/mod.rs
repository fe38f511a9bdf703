//! Signal Filter
//!
//! Turns the raw indicator signal into a filtered signal by running a fixed
//! sequence of veto checks:
//! 1. Side enablement from aggregated signal statistics
//! 2. Minimum per-symbol history (too little history passes the raw signal)
//! 3. Per-symbol winrate floor
//! 4. Per-symbol cooldown since the last trade
//! 5. Fast/slow EMA trend alignment (`SKIP_TREND`)
//! 6. ATR volatility floor (`SKIP_VOLATILITY`)
//! 7. Flat-market range floor (`SKIP_FLAT`)
//! 8. Directional confirmation against the trend EMA
//!
//! The filter holds no state of its own; history and statistics are read
//! from the caller on every call.

pub mod calibrator;
pub mod stats;

pub use calibrator::{ConfidenceState, ConfidenceStore};
pub use stats::{AlwaysEnabled, SideEnablement, SideStats, SignalStatsBook, StatsGateConfig};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{atr_from_series, ema, range_pct};
use crate::types::{FilteredSignal, Signal, TradeRecord};

/// Filter thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Below this many trades on a symbol the raw signal passes unfiltered
    pub min_history: usize,
    /// Symbol winrate below this holds
    pub winrate_threshold: f64,
    /// Seconds after the last trade on a symbol during which it holds
    pub cooldown_secs: i64,
    pub trend_fast_period: usize,
    pub trend_slow_period: usize,
    pub atr_period: usize,
    /// Minimum ATR as a fraction of price
    pub min_atr_pct: f64,
    pub range_window: usize,
    /// Minimum trailing (max - min) / min before the market counts as moving
    pub min_range_pct: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_history: 5,
            winrate_threshold: 0.3,
            cooldown_secs: 300,
            trend_fast_period: 9,
            trend_slow_period: 21,
            atr_period: 14,
            min_atr_pct: 0.001,
            range_window: 20,
            min_range_pct: 0.02,
        }
    }
}

/// Market inputs for one filter call
#[derive(Debug, Clone)]
pub struct FilterInput<'a> {
    pub symbol: &'a str,
    pub raw: Signal,
    pub price: f64,
    /// Trend EMA from the indicator engine
    pub trend_ema: f64,
    pub closes: &'a [f64],
    pub highs: Option<&'a [f64]>,
    pub lows: Option<&'a [f64]>,
    pub now: DateTime<Utc>,
}

/// Rule-based signal filter
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    config: FilterConfig,
}

impl SignalFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Run all checks in order and return the first veto, or the confirmed
    /// direction.
    pub fn apply(
        &self,
        input: &FilterInput<'_>,
        history: &[TradeRecord],
        enablement: &dyn SideEnablement,
    ) -> FilteredSignal {
        let cfg = &self.config;
        let symbol = input.symbol;

        if !enablement.is_signal_enabled(symbol, input.raw) {
            debug!(symbol = %symbol, raw = %input.raw, "Side disabled by signal statistics");
            return FilteredSignal::Hold;
        }

        let symbol_trades: Vec<&TradeRecord> =
            history.iter().filter(|t| t.symbol == symbol).collect();
        if symbol_trades.len() < cfg.min_history {
            debug!(
                symbol = %symbol,
                trades = symbol_trades.len(),
                "Not enough history, passing raw signal"
            );
            return input.raw.into();
        }

        let wins = symbol_trades.iter().filter(|t| t.is_win()).count();
        let winrate = wins as f64 / symbol_trades.len() as f64;
        if winrate < cfg.winrate_threshold {
            debug!(symbol = %symbol, winrate = winrate, "Symbol winrate below threshold");
            return FilteredSignal::Hold;
        }

        if let Some(last) = symbol_trades.iter().map(|t| t.time).max() {
            if input.now - last < Duration::seconds(cfg.cooldown_secs) {
                debug!(symbol = %symbol, last_trade = %last, "Symbol in filter cooldown");
                return FilteredSignal::Hold;
            }
        }

        if input.closes.len() >= cfg.trend_slow_period {
            let fast = ema(input.closes, cfg.trend_fast_period);
            let slow = ema(input.closes, cfg.trend_slow_period);
            let against_trend = match input.raw {
                Signal::Buy => fast < slow,
                Signal::Sell => fast > slow,
                Signal::Hold => false,
            };
            if against_trend {
                debug!(symbol = %symbol, raw = %input.raw, fast, slow, "Signal against trend");
                return FilteredSignal::SkipTrend;
            }
        }

        if let (Some(highs), Some(lows)) = (input.highs, input.lows) {
            if input.price > 0.0 && !highs.is_empty() {
                let atr = atr_from_series(highs, lows, input.closes, cfg.atr_period);
                let atr_pct = atr / input.price;
                if atr_pct < cfg.min_atr_pct {
                    debug!(symbol = %symbol, atr_pct, "Volatility below floor");
                    return FilteredSignal::SkipVolatility;
                }
            }
        }

        if !input.closes.is_empty() {
            let range = range_pct(input.closes, cfg.range_window);
            if range < cfg.min_range_pct {
                debug!(symbol = %symbol, range_pct = range, "Flat market");
                return FilteredSignal::SkipFlat;
            }
        }

        match input.raw {
            Signal::Buy if input.price > input.trend_ema => FilteredSignal::Buy,
            Signal::Sell if input.price < input.trend_ema => FilteredSignal::Sell,
            _ => FilteredSignal::Hold,
        }
    }
}
