//! Configuration management for AiTrader
//!
//! Loads built-in defaults, optional `config/default.*` and `config/local.*`
//! files, then environment overrides (`AITRADER__SECTION__KEY`) after reading
//! `.env`.

mod bridge;

pub use bridge::RuntimeConfig;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::persistence::DataLayout;
use crate::types::TradingMode;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub indicators: IndicatorsCfg,
    pub filter: FilterCfg,
    pub stats: StatsCfg,
    pub risk: RiskCfg,
    pub persistence: PersistenceConfig,
    pub exchange: ExchangeCfg,
    pub paper: PaperCfg,
    pub reconcile: ReconcileConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot tag for logs and notifications
    pub tag: String,
    /// Symbols traded each cycle, e.g. BTCUSDT
    pub symbols: Vec<String>,
    /// SPOT or FUTURES
    pub trading_mode: String,
    /// Dry run mode (paper executor only)
    pub dry_run: bool,
    pub cycle_interval_secs: u64,
    /// Prefix for state files; `main_bot` keeps bare names
    pub bot_prefix: String,
    pub log_level: String,
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorsCfg {
    pub ema_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub min_atr: f64,
    pub min_deviation: f64,
    pub range_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterCfg {
    pub min_history: usize,
    pub winrate_threshold: f64,
    pub cooldown_secs: i64,
    pub trend_fast_period: usize,
    pub trend_slow_period: usize,
    pub atr_period: usize,
    pub min_atr_pct: f64,
    pub range_window: usize,
    pub min_range_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsCfg {
    pub min_trades: u64,
    pub winrate_threshold: f64,
    pub expectancy_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskCfg {
    pub max_daily_loss_fraction: f64,
    /// Fixed USDT daily loss cap (0 disables)
    pub max_daily_loss_usdt: f64,
    pub max_trades_per_day: u32,
    pub max_consecutive_losses: u32,
    pub cooldown_secs: i64,
    pub risk_per_trade: f64,
    pub min_position_size: f64,
    pub max_position_fraction: f64,
    pub min_stop_pct: f64,
    pub min_take_profit_pct: f64,
    /// Take-profit distance as a multiple of the stop distance
    pub take_profit_ratio: f64,
    /// Length of the rolling risk window
    pub window_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeCfg {
    pub base_url: String,
    pub category: String,
    pub interval: String,
    pub limit: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperCfg {
    /// Starting virtual balance in USDT
    pub initial_balance: f64,
    pub slippage_bps: f64,
    pub fee_bps: f64,
    pub futures_leverage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Minimum balance change treated as realized pnl
    pub balance_delta_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Status report interval, 0 disables
    pub interval_secs: u64,
}

impl AppConfig {
    /// Builder pre-filled with every default
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("bot.tag", "aitrader")?
            .set_default("bot.symbols", vec!["BTCUSDT", "ETHUSDT"])?
            .set_default("bot.trading_mode", "SPOT")?
            .set_default("bot.dry_run", true)?
            .set_default("bot.cycle_interval_secs", 60)?
            .set_default("bot.bot_prefix", "main_bot")?
            .set_default("bot.log_level", "info")?
            .set_default("bot.log_json", false)?
            // Indicator defaults
            .set_default("indicators.ema_period", 20)?
            .set_default("indicators.rsi_period", 14)?
            .set_default("indicators.rsi_oversold", 30.0)?
            .set_default("indicators.rsi_overbought", 70.0)?
            .set_default("indicators.macd_fast", 12)?
            .set_default("indicators.macd_slow", 26)?
            .set_default("indicators.macd_signal", 9)?
            .set_default("indicators.atr_period", 14)?
            .set_default("indicators.min_atr", 0.01)?
            .set_default("indicators.min_deviation", 0.005)?
            .set_default("indicators.range_window", 20)?
            // Filter defaults
            .set_default("filter.min_history", 5)?
            .set_default("filter.winrate_threshold", 0.3)?
            .set_default("filter.cooldown_secs", 300)?
            .set_default("filter.trend_fast_period", 9)?
            .set_default("filter.trend_slow_period", 21)?
            .set_default("filter.atr_period", 14)?
            .set_default("filter.min_atr_pct", 0.001)?
            .set_default("filter.range_window", 20)?
            .set_default("filter.min_range_pct", 0.02)?
            // Signal statistics defaults
            .set_default("stats.min_trades", 5)?
            .set_default("stats.winrate_threshold", 0.3)?
            .set_default("stats.expectancy_threshold", 0.0)?
            // Risk defaults
            .set_default("risk.max_daily_loss_fraction", 0.10)?
            .set_default("risk.max_daily_loss_usdt", 0.0)?
            .set_default("risk.max_trades_per_day", 5)?
            .set_default("risk.max_consecutive_losses", 3)?
            .set_default("risk.cooldown_secs", 300)?
            .set_default("risk.risk_per_trade", 0.01)?
            .set_default("risk.min_position_size", 5.0)?
            .set_default("risk.max_position_fraction", 0.10)?
            .set_default("risk.min_stop_pct", 0.02)?
            .set_default("risk.min_take_profit_pct", 0.03)?
            .set_default("risk.take_profit_ratio", 1.8)?
            .set_default("risk.window_hours", 24)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            // Exchange defaults
            .set_default("exchange.base_url", "https://api.bybit.com")?
            .set_default("exchange.category", "spot")?
            .set_default("exchange.interval", "15")?
            .set_default("exchange.limit", 200)?
            .set_default("exchange.timeout_ms", 10_000)?
            .set_default("exchange.max_retries", 3)?
            .set_default("exchange.base_backoff_ms", 500)?
            .set_default("exchange.max_backoff_ms", 10_000)?
            // Paper trading defaults
            .set_default("paper.initial_balance", 1000.0)?
            .set_default("paper.slippage_bps", 5.0)?
            .set_default("paper.fee_bps", 10.0)?
            .set_default("paper.futures_leverage", 9.0)?
            // Reconciliation / reporting
            .set_default("reconcile.balance_delta_threshold", 0.001)?
            .set_default("report.interval_secs", 3600)?;
        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (AITRADER__*)
            .add_source(
                Environment::with_prefix("AITRADER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bot.symbols")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Defaults only, no files or environment
    pub fn from_defaults() -> Result<Self> {
        let config = Self::defaults()?
            .build()
            .context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Sanity checks that would otherwise surface mid-cycle
    pub fn validate(&self) -> Result<()> {
        if self.bot.symbols.is_empty() {
            bail!("bot.symbols must list at least one symbol");
        }
        self.trading_mode()?;
        if self.bot.cycle_interval_secs == 0 {
            bail!("bot.cycle_interval_secs must be positive");
        }
        if !(0.0..=1.0).contains(&self.risk.max_position_fraction) {
            bail!("risk.max_position_fraction must be within [0, 1]");
        }
        if self.risk.window_hours <= 0 {
            bail!("risk.window_hours must be positive");
        }
        if self.risk.take_profit_ratio <= 0.0 {
            bail!("risk.take_profit_ratio must be positive");
        }
        if self.filter.trend_fast_period >= self.filter.trend_slow_period {
            bail!("filter.trend_fast_period must be below filter.trend_slow_period");
        }
        Ok(())
    }

    pub fn trading_mode(&self) -> Result<TradingMode> {
        self.bot
            .trading_mode
            .parse()
            .with_context(|| format!("Invalid bot.trading_mode '{}'", self.bot.trading_mode))
    }

    pub fn data_layout(&self) -> DataLayout {
        DataLayout::new(&self.persistence.data_dir, &self.bot.bot_prefix)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} prefix={} symbols={:?} mode={} dry_run={} cycle={}s data_dir={} max_trades={} interval={}",
            self.bot.tag,
            self.bot.bot_prefix,
            self.bot.symbols,
            self.bot.trading_mode,
            self.bot.dry_run,
            self.bot.cycle_interval_secs,
            self.persistence.data_dir,
            self.risk.max_trades_per_day,
            self.exchange.interval
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_deserialize_and_validate() {
        let cfg = AppConfig::from_defaults().unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.bot.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.trading_mode().unwrap(), TradingMode::Spot);
        assert_eq!(cfg.risk.max_trades_per_day, 5);
        assert_eq!(cfg.filter.min_history, 5);
        assert!(cfg.digest().contains("prefix=main_bot"));
    }

    #[test]
    fn file_overrides_defaults() {
        let overrides = r#"{
            "bot": { "trading_mode": "futures", "bot_prefix": "ai_bot" },
            "risk": { "max_trades_per_day": 8, "take_profit_ratio": 2.5, "window_hours": 12 }
        }"#;
        let cfg: AppConfig = AppConfig::defaults()
            .unwrap()
            .add_source(File::from_str(overrides, FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.trading_mode().unwrap(), TradingMode::Futures);
        assert_eq!(cfg.risk.max_trades_per_day, 8);
        let risk = cfg.risk.to_runtime();
        assert_eq!(risk.take_profit_ratio, 2.5);
        assert_eq!(risk.window_hours, 12);
        assert_eq!(risk.min_stop_pct, 0.02);
        assert!(cfg
            .data_layout()
            .confidence_file()
            .ends_with("ai_bot_ai_brain.json"));
    }

    #[test]
    fn unknown_trading_mode_fails_validation() {
        let mut cfg = AppConfig::from_defaults().unwrap();
        cfg.bot.trading_mode = "margin".to_string();
        assert!(cfg.validate().is_err());
    }
}
