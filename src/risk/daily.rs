//! Per-UTC-day trading summary
//!
//! Separate from the rolling risk window: these counters reset at UTC
//! midnight and the finished day is handed back once so it can be reported.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::persistence::{MemoryStore, StateStore};

/// Settled-trade counters for one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    #[serde(default)]
    pub best_trade: Option<f64>,
    #[serde(default)]
    pub worst_trade: Option<f64>,
    /// Largest single-trade loss of the day, never above zero
    pub max_drawdown: f64,
    /// Percentage of settled trades with positive pnl
    pub winrate: f64,
    pub updated_at: DateTime<Utc>,
}

impl DailyStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            total_trades: 0,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
            best_trade: None,
            worst_trade: None,
            max_drawdown: 0.0,
            winrate: 0.0,
            updated_at: now,
        }
    }

    fn record(&mut self, pnl: f64, now: DateTime<Utc>) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl += pnl;
        self.best_trade = Some(self.best_trade.map_or(pnl, |best| best.max(pnl)));
        self.worst_trade = Some(self.worst_trade.map_or(pnl, |worst| worst.min(pnl)));
        self.max_drawdown = self.max_drawdown.min(pnl);
        self.winrate = self.wins as f64 / self.total_trades as f64 * 100.0;
        self.updated_at = now;
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "📅 Daily report {}", self.date.format("%Y-%m-%d"));
        let _ = writeln!(
            out,
            "Trades: {} (W {} / L {}), winrate {:.1}%",
            self.total_trades, self.wins, self.losses, self.winrate
        );
        let _ = writeln!(out, "PnL: {:+.4} USDT", self.total_pnl);
        let _ = write!(
            out,
            "Best {:+.4} | Worst {:+.4} | Max drawdown {:.4}",
            self.best_trade.unwrap_or(0.0),
            self.worst_trade.unwrap_or(0.0),
            self.max_drawdown
        );
        out
    }
}

/// Owns today's [`DailyStats`] and persists every change
pub struct DailyStatsTracker {
    stats: DailyStats,
    store: Box<dyn StateStore<DailyStats>>,
}

impl DailyStatsTracker {
    /// Load today's counters; a record from another day starts fresh
    pub fn open(store: Box<dyn StateStore<DailyStats>>, now: DateTime<Utc>) -> Result<Self> {
        let stats = match store.load() {
            Ok(Some(stats)) if stats.date == now.date_naive() => stats,
            Ok(Some(stale)) => {
                info!(date = %stale.date, trades = stale.total_trades, "Daily stats from another day, starting fresh");
                DailyStats::new(now)
            }
            Ok(None) => DailyStats::new(now),
            Err(BotError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Daily stats corrupt, starting fresh");
                DailyStats::new(now)
            }
            Err(e) => return Err(e),
        };

        let tracker = Self { stats, store };
        tracker.persist();
        Ok(tracker)
    }

    pub fn in_memory(now: DateTime<Utc>) -> Self {
        Self {
            stats: DailyStats::new(now),
            store: Box::new(MemoryStore::new()),
        }
    }

    pub fn current(&self) -> &DailyStats {
        &self.stats
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.stats) {
            warn!(error = %e, location = %self.store.location(), "Failed to persist daily stats");
        }
    }

    /// Start a new day if the UTC date changed. Returns the finished day.
    pub fn roll(&mut self, now: DateTime<Utc>) -> Option<DailyStats> {
        if now.date_naive() == self.stats.date {
            return None;
        }
        let finished = std::mem::replace(&mut self.stats, DailyStats::new(now));
        info!(
            date = %finished.date,
            trades = finished.total_trades,
            pnl = finished.total_pnl,
            "Daily stats rolled over"
        );
        self.persist();
        Some(finished)
    }

    /// Count one settled trade, rolling the day first when needed
    pub fn record(&mut self, pnl: f64, now: DateTime<Utc>) -> Option<DailyStats> {
        let finished = self.roll(now);
        self.stats.record(pnl, now);
        self.persist();
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn tracks_best_worst_and_drawdown() {
        let now = at("2024-03-01T10:00:00Z");
        let mut tracker = DailyStatsTracker::in_memory(now);
        assert!(tracker.record(2.0, now).is_none());
        tracker.record(-1.5, now);
        tracker.record(0.5, now);
        tracker.record(-0.5, now);

        let stats = tracker.current();
        assert_eq!(stats.total_trades, 4);
        assert_eq!((stats.wins, stats.losses), (2, 2));
        assert!((stats.total_pnl - 0.5).abs() < 1e-9);
        assert_eq!(stats.best_trade, Some(2.0));
        assert_eq!(stats.worst_trade, Some(-1.5));
        assert!((stats.max_drawdown + 1.5).abs() < 1e-9);
        assert!((stats.winrate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_pnl_counts_as_loss() {
        let now = at("2024-03-01T10:00:00Z");
        let mut tracker = DailyStatsTracker::in_memory(now);
        tracker.record(0.0, now);
        assert_eq!(tracker.current().losses, 1);
        assert_eq!(tracker.current().max_drawdown, 0.0);
    }

    #[test]
    fn utc_midnight_hands_back_finished_day() {
        let evening = at("2024-03-01T23:59:00Z");
        let mut tracker = DailyStatsTracker::in_memory(evening);
        tracker.record(-1.0, evening);
        assert!(tracker.roll(at("2024-03-01T23:59:59Z")).is_none());

        let finished = tracker.record(3.0, at("2024-03-02T00:00:05Z")).unwrap();
        assert_eq!(finished.date, evening.date_naive());
        assert_eq!(finished.total_trades, 1);
        assert_eq!(finished.worst_trade, Some(-1.0));

        let today = tracker.current();
        assert_eq!(today.date.to_string(), "2024-03-02");
        assert_eq!(today.total_trades, 1);
        assert_eq!(today.best_trade, Some(3.0));
        assert!(tracker.roll(at("2024-03-02T12:00:00Z")).is_none());
    }

    #[test]
    fn open_discards_other_days() {
        let yesterday = at("2024-03-01T08:00:00Z");
        let today = at("2024-03-02T08:00:00Z");

        let mut stale = DailyStats::new(yesterday);
        stale.record(4.0, yesterday);
        let tracker = DailyStatsTracker::open(Box::new(MemoryStore::with_value(stale)), today).unwrap();
        assert_eq!(tracker.current().total_trades, 0);
        assert_eq!(tracker.current().date, today.date_naive());

        let mut same_day = DailyStats::new(today);
        same_day.record(4.0, today);
        let tracker = DailyStatsTracker::open(Box::new(MemoryStore::with_value(same_day)), today).unwrap();
        assert_eq!(tracker.current().total_trades, 1);
    }
}
