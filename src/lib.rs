//! AiTrader Library
//!
//! Decision core for a rule-based crypto trading bot on Bybit

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod features;
pub mod paper_trading;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod types;

pub use engine::{BotContext, CoreState, DecisionEngine, EngineSettings, SymbolOutcome};
pub use error::{BotError, Result};
