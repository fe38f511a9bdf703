//! Configuration Bridge
//!
//! Converts config sections into the runtime configs of each component so
//! components never depend on the config loader.

use super::{
    AppConfig, ExchangeCfg, FilterCfg, IndicatorsCfg, PaperCfg, ReconcileConfig, RiskCfg, StatsCfg,
};
use crate::engine::EngineSettings;
use crate::exchange::{BybitConfig, RetryPolicy};
use crate::features::IndicatorConfig;
use crate::paper_trading::PaperConfig;
use crate::risk::RiskConfig;
use crate::strategy::{FilterConfig, StatsGateConfig};

/// Conversion from a config section to a component config
pub trait RuntimeConfig {
    type Runtime;

    fn to_runtime(&self) -> Self::Runtime;
}

impl RuntimeConfig for IndicatorsCfg {
    type Runtime = IndicatorConfig;

    fn to_runtime(&self) -> IndicatorConfig {
        IndicatorConfig {
            ema_period: self.ema_period,
            rsi_period: self.rsi_period,
            rsi_oversold: self.rsi_oversold,
            rsi_overbought: self.rsi_overbought,
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
            atr_period: self.atr_period,
            min_atr: self.min_atr,
            min_deviation: self.min_deviation,
            range_window: self.range_window,
        }
    }
}

impl RuntimeConfig for FilterCfg {
    type Runtime = FilterConfig;

    fn to_runtime(&self) -> FilterConfig {
        FilterConfig {
            min_history: self.min_history,
            winrate_threshold: self.winrate_threshold,
            cooldown_secs: self.cooldown_secs,
            trend_fast_period: self.trend_fast_period,
            trend_slow_period: self.trend_slow_period,
            atr_period: self.atr_period,
            min_atr_pct: self.min_atr_pct,
            range_window: self.range_window,
            min_range_pct: self.min_range_pct,
        }
    }
}

impl RuntimeConfig for StatsCfg {
    type Runtime = StatsGateConfig;

    fn to_runtime(&self) -> StatsGateConfig {
        StatsGateConfig {
            min_trades: self.min_trades,
            winrate_threshold: self.winrate_threshold,
            expectancy_threshold: self.expectancy_threshold,
        }
    }
}

impl RuntimeConfig for RiskCfg {
    type Runtime = RiskConfig;

    fn to_runtime(&self) -> RiskConfig {
        RiskConfig {
            max_daily_loss_fraction: self.max_daily_loss_fraction,
            max_daily_loss_usdt: self.max_daily_loss_usdt,
            max_trades_per_day: self.max_trades_per_day,
            max_consecutive_losses: self.max_consecutive_losses,
            cooldown_secs: self.cooldown_secs,
            risk_per_trade: self.risk_per_trade,
            min_position_size: self.min_position_size,
            max_position_fraction: self.max_position_fraction,
            min_stop_pct: self.min_stop_pct,
            min_take_profit_pct: self.min_take_profit_pct,
            take_profit_ratio: self.take_profit_ratio,
            window_hours: self.window_hours,
        }
    }
}

impl RuntimeConfig for ExchangeCfg {
    type Runtime = (BybitConfig, RetryPolicy);

    fn to_runtime(&self) -> (BybitConfig, RetryPolicy) {
        (
            BybitConfig {
                base_url: self.base_url.trim_end_matches('/').to_string(),
                category: self.category.to_lowercase(),
                interval: self.interval.clone(),
                limit: self.limit,
                timeout_ms: self.timeout_ms,
            },
            RetryPolicy {
                max_retries: self.max_retries,
                base_backoff_ms: self.base_backoff_ms,
                max_backoff_ms: self.max_backoff_ms,
            },
        )
    }
}

impl RuntimeConfig for PaperCfg {
    type Runtime = PaperConfig;

    fn to_runtime(&self) -> PaperConfig {
        PaperConfig {
            initial_balance: self.initial_balance,
            slippage_bps: self.slippage_bps,
            fee_bps: self.fee_bps,
            futures_leverage: self.futures_leverage,
        }
    }
}

impl RuntimeConfig for ReconcileConfig {
    type Runtime = f64;

    fn to_runtime(&self) -> f64 {
        self.balance_delta_threshold.abs()
    }
}

impl RuntimeConfig for AppConfig {
    type Runtime = EngineSettings;

    fn to_runtime(&self) -> EngineSettings {
        EngineSettings {
            bot_tag: self.bot.tag.clone(),
            symbols: self
                .bot
                .symbols
                .iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            balance_delta_threshold: self.reconcile.to_runtime(),
            report_interval_secs: self.report.interval_secs,
        }
    }
}
