//! Signal Statistics
//!
//! Aggregates settled trades per `"<symbol>|<SIDE>"` and decides whether a
//! side is still worth trading.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::persistence::StateStore;
use crate::types::{Signal, TradeRecord};

/// Per-side enablement check consumed by the signal filter
pub trait SideEnablement {
    fn is_signal_enabled(&self, symbol: &str, signal: Signal) -> bool;
}

/// Every side always enabled
pub struct AlwaysEnabled;

impl SideEnablement for AlwaysEnabled {
    fn is_signal_enabled(&self, _symbol: &str, _signal: Signal) -> bool {
        true
    }
}

/// Aggregate for one symbol/side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideStats {
    pub count: u64,
    pub wins: u64,
    pub pnl_sum: f64,
    pub winrate: f64,
    pub expectancy: f64,
}

impl SideStats {
    fn record(&mut self, pnl: Option<f64>) {
        let pnl = pnl.unwrap_or(0.0);
        self.count += 1;
        if pnl > 0.0 {
            self.wins += 1;
        }
        self.pnl_sum += pnl;
        self.winrate = self.wins as f64 / self.count as f64;
        self.expectancy = self.pnl_sum / self.count as f64;
    }
}

/// Thresholds for disabling a side
#[derive(Debug, Clone)]
pub struct StatsGateConfig {
    /// Below this sample count the side stays enabled
    pub min_trades: u64,
    pub winrate_threshold: f64,
    pub expectancy_threshold: f64,
}

impl Default for StatsGateConfig {
    fn default() -> Self {
        Self {
            min_trades: 5,
            winrate_threshold: 0.3,
            expectancy_threshold: 0.0,
        }
    }
}

pub fn stats_key(symbol: &str, signal: Signal) -> String {
    format!("{}|{}", symbol, signal)
}

/// Signal statistics book
#[derive(Debug, Clone, Default)]
pub struct SignalStatsBook {
    config: StatsGateConfig,
    entries: BTreeMap<String, SideStats>,
}

impl SignalStatsBook {
    pub fn new(config: StatsGateConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }

    /// Rebuild from the full trade journal
    pub fn from_trades(config: StatsGateConfig, trades: &[TradeRecord]) -> Self {
        let mut book = Self::new(config);
        book.recompute(trades);
        book
    }

    pub fn recompute(&mut self, trades: &[TradeRecord]) {
        self.entries.clear();
        for trade in trades {
            self.entries
                .entry(stats_key(&trade.symbol, trade.side.signal()))
                .or_default()
                .record(trade.pnl);
        }
    }

    pub fn get(&self, symbol: &str, signal: Signal) -> Option<&SideStats> {
        self.entries.get(&stats_key(symbol, signal))
    }

    pub fn entries(&self) -> &BTreeMap<String, SideStats> {
        &self.entries
    }

    pub fn config(&self) -> &StatsGateConfig {
        &self.config
    }

    pub fn save(&self, store: &dyn StateStore<BTreeMap<String, SideStats>>) -> Result<()> {
        store.save(&self.entries)?;
        info!(
            location = %store.location(),
            keys = self.entries.len(),
            "Signal statistics saved"
        );
        Ok(())
    }

    /// Load a previously saved book; corrupt files start empty
    pub fn load(
        config: StatsGateConfig,
        store: &dyn StateStore<BTreeMap<String, SideStats>>,
    ) -> Result<Self> {
        let entries = match store.load() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(BotError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Signal statistics corrupt, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { config, entries })
    }
}

impl SideEnablement for SignalStatsBook {
    fn is_signal_enabled(&self, symbol: &str, signal: Signal) -> bool {
        let Some(stats) = self.get(symbol, signal) else {
            return true;
        };
        if stats.count < self.config.min_trades {
            return true;
        }
        !(stats.winrate < self.config.winrate_threshold
            && stats.expectancy < self.config.expectancy_threshold)
    }
}
