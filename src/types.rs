//! Core types used throughout AiTrader
//!
//! Defines candles, signal classes, trade records and the order/execution
//! shapes exchanged with the execution collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;

/// Candlestick data, ordered oldest → newest once it reaches the core
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (start of period, milliseconds)
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume in base currency
    pub volume: f64,
    /// Turnover in quote currency
    pub turnover: f64,
}

/// Signal class: raw technical signal, confidence key and final decision
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Buy, Signal::Sell, Signal::Hold];

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Signal::Hold)
    }

    /// Trade side for actionable signals
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
            Signal::Hold => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for Signal {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            "HOLD" => Ok(Signal::Hold),
            other => Err(BotError::InvalidTrade(format!("unknown signal '{}'", other))),
        }
    }
}

/// Output of the signal filter.
///
/// The `Skip*` markers are kept apart from `Hold` so diagnostics can tell
/// which screen vetoed the signal; every consumer treats them as non-actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilteredSignal {
    Buy,
    Sell,
    Hold,
    SkipTrend,
    SkipVolatility,
    SkipFlat,
}

impl FilteredSignal {
    /// Collapse to a signal class; skip markers become `Hold`
    pub fn as_signal(&self) -> Signal {
        match self {
            FilteredSignal::Buy => Signal::Buy,
            FilteredSignal::Sell => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, FilteredSignal::Buy | FilteredSignal::Sell)
    }
}

impl From<Signal> for FilteredSignal {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Buy => FilteredSignal::Buy,
            Signal::Sell => FilteredSignal::Sell,
            Signal::Hold => FilteredSignal::Hold,
        }
    }
}

impl fmt::Display for FilteredSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilteredSignal::Buy => write!(f, "BUY"),
            FilteredSignal::Sell => write!(f, "SELL"),
            FilteredSignal::Hold => write!(f, "HOLD"),
            FilteredSignal::SkipTrend => write!(f, "SKIP_TREND"),
            FilteredSignal::SkipVolatility => write!(f, "SKIP_VOLATILITY"),
            FilteredSignal::SkipFlat => write!(f, "SKIP_FLAT"),
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn signal(&self) -> Signal {
        match self {
            Side::Buy => Signal::Buy,
            Side::Sell => Signal::Sell,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Market the order is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    #[default]
    Spot,
    Futures,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Spot => write!(f, "SPOT"),
            TradingMode::Futures => write!(f, "FUTURES"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SPOT" => Ok(TradingMode::Spot),
            "FUTURES" | "LINEAR" => Ok(TradingMode::Futures),
            other => Err(BotError::UnknownMode(other.to_string())),
        }
    }
}

/// One entry of the append-only trade journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    /// Entry price
    pub price: f64,
    /// Base-asset quantity
    pub qty: f64,
    pub time: DateTime<Utc>,
    /// Realized pnl in USDT, attached once the trade settles
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub simulated: bool,
    /// Executor order id, used to match closed-position reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TradingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_signal: Option<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_signal: Option<FilteredSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
}

impl TradeRecord {
    pub fn new(symbol: &str, side: Side, price: f64, qty: f64, time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            price,
            qty,
            time,
            pnl: None,
            simulated: false,
            order_id: None,
            mode: None,
            raw_signal: None,
            filtered_signal: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Only a trade without pnl (null or exactly zero) may receive one
    pub fn awaits_pnl(&self) -> bool {
        match self.pnl {
            None => true,
            Some(p) => p == 0.0,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl.map(|p| p > 0.0).unwrap_or(false)
    }
}

/// Fully specified order handed to an executor
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    /// Balance at decision time (USDT)
    pub balance: f64,
    /// Position size in USDT
    pub amount_usdt: f64,
    /// Base-asset quantity derived from `amount_usdt / price`
    pub qty: f64,
    pub mode: TradingMode,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl OrderRequest {
    /// Build an order, rejecting non-positive price or quantity before any
    /// external call is made.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        side: Side,
        price: f64,
        balance: f64,
        amount_usdt: f64,
        mode: TradingMode,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<Self, BotError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(BotError::InvalidTrade(format!(
                "non-positive price {} for {}",
                price, symbol
            )));
        }
        let qty = amount_usdt / price;
        if !qty.is_finite() || qty <= 0.0 {
            return Err(BotError::InvalidTrade(format!(
                "zero quantity for {} (amount {:.4} USDT)",
                symbol, amount_usdt
            )));
        }
        Ok(Self {
            symbol: symbol.to_string(),
            side,
            price,
            balance,
            amount_usdt,
            qty,
            mode,
            stop_loss,
            take_profit,
        })
    }
}

/// Result of an all-or-nothing execution call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub fill_price: f64,
    pub qty: f64,
    pub mode: TradingMode,
    pub simulated: bool,
    pub fee: f64,
}

/// Authoritative realized-pnl report from the account collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPnl {
    pub symbol: String,
    /// Order that opened the position, when the account knows it
    #[serde(default)]
    pub order_id: Option<String>,
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}
