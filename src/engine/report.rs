//! Periodic status report

use chrono::{DateTime, Duration, Utc};
use std::fmt::Write as _;

use crate::risk::{DailyRiskState, DailyStats};
use crate::strategy::ConfidenceState;
use crate::types::{Signal, TradeRecord, TradingMode};

/// Everything shown in one status message
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub bot_tag: String,
    pub generated_at: DateTime<Utc>,
    pub balance: Option<f64>,
    pub enabled: bool,
    pub live: bool,
    pub mode: TradingMode,
    pub risk: DailyRiskState,
    pub daily: DailyStats,
    pub confidence: ConfidenceState,
    pub recent_trades: Vec<TradeRecord>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "📊 [{}] status {}", self.bot_tag, self.generated_at.format("%Y-%m-%d %H:%M UTC"));

        match self.balance {
            Some(b) => {
                let _ = writeln!(out, "Balance: {:.2} USDT", b);
            }
            None => {
                let _ = writeln!(out, "Balance: unavailable");
            }
        }
        let _ = writeln!(
            out,
            "Mode: {} | {} | {}",
            self.mode,
            if self.live { "LIVE" } else { "DRY-RUN" },
            if self.enabled { "running" } else { "stopped" }
        );

        let risk = &self.risk;
        let _ = writeln!(
            out,
            "Risk: {} trades, loss {:.2}, streak {}{}",
            risk.trade_count,
            risk.cumulative_loss,
            risk.consecutive_losses,
            match &risk.block_reason {
                Some(reason) if risk.blocked => format!(" | BLOCKED: {}", reason),
                _ => String::new(),
            }
        );

        let day = &self.daily;
        let _ = writeln!(
            out,
            "Today: {} trades (W {} / L {}), pnl {:+.2}, winrate {:.1}%",
            day.total_trades, day.wins, day.losses, day.total_pnl, day.winrate
        );

        let conf = &self.confidence;
        let classes: Vec<String> = Signal::ALL
            .iter()
            .map(|s| format!("{}={:.2}", s, conf.confidence.get(s).copied().unwrap_or(1.0)))
            .collect();
        let _ = writeln!(
            out,
            "Confidence: {} | W/L {}/{} of {}",
            classes.join(" "),
            conf.win_trades,
            conf.loss_trades,
            conf.total_trades
        );

        if self.recent_trades.is_empty() {
            let _ = write!(out, "No trades yet");
        } else {
            let _ = writeln!(out, "Last trades:");
            for t in &self.recent_trades {
                let pnl = t
                    .pnl
                    .map(|p| format!("{:+.2}", p))
                    .unwrap_or_else(|| "open".to_string());
                let _ = writeln!(
                    out,
                    "  {} {} {} @ {:.4} qty {:.6} pnl {}{}",
                    t.time.format("%m-%d %H:%M"),
                    t.symbol,
                    t.side,
                    t.price,
                    t.qty,
                    pnl,
                    if t.simulated { " (sim)" } else { "" }
                );
            }
        }
        out.trim_end().to_string()
    }
}

/// Tracks when the next report is due
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    interval: Duration,
    last_sent: Option<DateTime<Utc>>,
}

impl ReportSchedule {
    /// An interval of zero disables reporting
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::seconds(interval_secs as i64),
            last_sent: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.interval <= Duration::zero() {
            return false;
        }
        match self.last_sent {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.last_sent = Some(now);
    }
}
