//! Indicator Engine - Technical indicators over a candle series
//!
//! Computes:
//! - EMA (SMA-seeded, full-length series)
//! - RSI (simple average of gains/losses over the last `period` deltas)
//! - MACD (line, signal, histogram)
//! - ATR (true range mean, degrading to mean high-low on short history)
//! - Range% over a trailing window (flat-market detector)
//!
//! Every function is pure and total: short or empty history yields a
//! neutral value instead of an error.

use serde::{Deserialize, Serialize};

use crate::types::{Candle, Signal};

/// Indicator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Trend EMA period (price vs EMA decides direction)
    pub ema_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    /// Raw signals need at least this much ATR (price units)
    pub min_atr: f64,
    /// Minimum |price - ema| / price before a raw signal is emitted
    pub min_deviation: f64,
    /// Trailing window for range%
    pub range_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_period: 20,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            min_atr: 0.01,
            min_deviation: 0.005,
            range_window: 20,
        }
    }
}

/// MACD triple for the latest candle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Indicator values at the latest candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub ema: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub atr: f64,
    pub range_pct: f64,
}

/// No data: zero prices and a neutral RSI
impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            price: 0.0,
            ema: 0.0,
            rsi: 50.0,
            macd: Macd::default(),
            atr: 0.0,
            range_pct: 0.0,
        }
    }
}

/// Raw signal plus everything the filter needs downstream
#[derive(Debug, Clone, Default)]
pub struct MarketAnalysis {
    pub raw: Signal,
    pub snapshot: IndicatorSnapshot,
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
}

/// EMA series aligned with `values`.
///
/// With at least `period` points the first `period - 1` entries are the
/// running mean, entry `period - 1` is the SMA seed and the recurrence
/// `ema[i] = v[i] * k + ema[i-1] * (1 - k)` runs from there. Shorter input is
/// seeded with its first value.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let period = period.max(1);
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());

    let start = if values.len() >= period {
        let mut sum = 0.0;
        for (i, v) in values.iter().take(period).enumerate() {
            sum += v;
            out.push(sum / (i + 1) as f64);
        }
        period
    } else {
        out.push(values[0]);
        1
    };

    for v in &values[start..] {
        let prev = out[out.len() - 1];
        out.push(v * k + prev * (1.0 - k));
    }
    out
}

/// Latest EMA value (0.0 for an empty series)
pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

/// RSI over the last `period` deltas; 50 when history is short, 100 when
/// there were no losses.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    let period = period.max(1);
    if closes.len() < period + 1 {
        return 50.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in (closes.len() - period)..closes.len() {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD with EMA-based signal line
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    if closes.is_empty() {
        return Macd::default();
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    let line_series: Vec<f64> = fast_series
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| f - s)
        .collect();

    let line = line_series.last().copied().unwrap_or(0.0);
    let signal_line = ema(&line_series, signal);
    Macd {
        line,
        signal: signal_line,
        histogram: line - signal_line,
    }
}

/// ATR from parallel high/low/close series
pub fn atr_from_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = highs.len().min(lows.len()).min(closes.len());
    if n == 0 {
        return 0.0;
    }
    let period = period.max(1);

    if n < period + 1 {
        let total: f64 = (0..n).map(|i| (highs[i] - lows[i]).abs()).sum();
        return total / n as f64;
    }

    let mut total = 0.0;
    for i in (n - period)..n {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        total += tr;
    }
    total / period as f64
}

/// ATR over the last `period` candles
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    atr_from_series(&highs, &lows, &closes, period)
}

/// (max - min) / min of the trailing `window` closes
pub fn range_pct(closes: &[f64], window: usize) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    let start = closes.len().saturating_sub(window.max(1));
    let tail = &closes[start..];
    let max = tail.iter().copied().fold(f64::MIN, f64::max);
    let min = tail.iter().copied().fold(f64::MAX, f64::min);
    if min <= 0.0 {
        return 0.0;
    }
    (max - min) / min
}

/// Direction of `value` relative to `reference`
fn direction(value: f64, reference: f64) -> Signal {
    if value > reference {
        Signal::Buy
    } else if value < reference {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Indicator engine producing the composite raw signal
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute indicators for the latest candle
    pub fn snapshot(&self, candles: &[Candle]) -> IndicatorSnapshot {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let cfg = &self.config;
        IndicatorSnapshot {
            price: closes.last().copied().unwrap_or(0.0),
            ema: ema(&closes, cfg.ema_period),
            rsi: rsi(&closes, cfg.rsi_period),
            macd: macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
            atr: atr(candles, cfg.atr_period),
            range_pct: range_pct(&closes, cfg.range_window),
        }
    }

    /// Composite raw signal from a snapshot.
    ///
    /// Trend is price vs EMA. It survives when MACD agrees, or when RSI sits in
    /// the extreme band matching the trend; RSI in the opposite extreme or a
    /// too-quiet ATR vetoes it. Finally the price has to be at least
    /// `min_deviation` away from the EMA.
    pub fn raw_signal(&self, snap: &IndicatorSnapshot) -> Signal {
        let cfg = &self.config;

        let trend = direction(snap.price, snap.ema);
        let macd_dir = direction(snap.macd.line, snap.macd.signal);

        let oversold = snap.rsi < cfg.rsi_oversold;
        let overbought = snap.rsi > cfg.rsi_overbought;
        let volatility_ok = snap.atr > cfg.min_atr;
        let momentum_ok = (oversold && trend == Signal::Buy)
            || (overbought && trend == Signal::Sell)
            || (!oversold && !overbought);

        if !volatility_ok || !momentum_ok || trend == Signal::Hold {
            return Signal::Hold;
        }

        let rsi_confirms = (oversold && trend == Signal::Buy) || (overbought && trend == Signal::Sell);
        let signal = if trend == macd_dir || rsi_confirms {
            trend
        } else {
            Signal::Hold
        };

        if signal != Signal::Hold && snap.price > 0.0 {
            let deviation = (snap.price - snap.ema).abs() / snap.price;
            if deviation < cfg.min_deviation {
                return Signal::Hold;
            }
        }
        signal
    }

    /// Full analysis of a candle series
    pub fn analyze(&self, candles: &[Candle]) -> MarketAnalysis {
        if candles.is_empty() {
            tracing::debug!("IndicatorEngine::analyze: no candles provided");
            return MarketAnalysis::default();
        }

        let snapshot = self.snapshot(candles);
        let raw = self.raw_signal(&snapshot);

        tracing::debug!(
            candles = candles.len(),
            price = snapshot.price,
            ema = snapshot.ema,
            rsi = snapshot.rsi,
            macd_hist = snapshot.macd.histogram,
            atr = snapshot.atr,
            range_pct = snapshot.range_pct,
            raw = %raw,
            "Indicators computed"
        );

        MarketAnalysis {
            raw,
            snapshot,
            closes: candles.iter().map(|c| c.close).collect(),
            highs: candles.iter().map(|c| c.high).collect(),
            lows: candles.iter().map(|c| c.low).collect(),
        }
    }
}
