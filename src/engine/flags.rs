//! Bot control flags shared between the trading loop and control surfaces.
//!
//! Each toggle is a single atomic write; readers never see a torn state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::info;

use crate::error::Result;
use crate::types::TradingMode;

const MODE_SPOT: u8 = 0;
const MODE_FUTURES: u8 = 1;

#[derive(Debug)]
pub struct BotFlags {
    enabled: AtomicBool,
    live: AtomicBool,
    mode: AtomicU8,
}

impl BotFlags {
    pub fn new(enabled: bool, live: bool, mode: TradingMode) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            live: AtomicBool::new(live),
            mode: AtomicU8::new(encode(mode)),
        }
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Bot started");
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("Bot stopped");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
        info!(live, "Live trading toggled");
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn trading_mode(&self) -> TradingMode {
        match self.mode.load(Ordering::SeqCst) {
            MODE_FUTURES => TradingMode::Futures,
            _ => TradingMode::Spot,
        }
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        self.mode.store(encode(mode), Ordering::SeqCst);
        info!(mode = %mode, "Trading mode changed");
    }

    /// Parse and apply a mode name; unknown names leave the mode untouched
    pub fn set_trading_mode_str(&self, mode: &str) -> Result<TradingMode> {
        let mode: TradingMode = mode.parse()?;
        self.set_trading_mode(mode);
        Ok(mode)
    }
}

impl Default for BotFlags {
    fn default() -> Self {
        Self::new(true, false, TradingMode::Spot)
    }
}

fn encode(mode: TradingMode) -> u8 {
    match mode {
        TradingMode::Spot => MODE_SPOT,
        TradingMode::Futures => MODE_FUTURES,
    }
}
