//! Paper Trading Engine
//!
//! Simulates order execution for dry-run bots:
//! - Virtual USDT balance with slippage and fees in basis points
//! - Futures orders use a fixed leverage multiplier on notional
//! - Open positions close when price crosses their stop-loss or take-profit
//!   and are reported as authoritative realized pnl
//!
//! The same object serves as `OrderExecutor` and `Account`, so a fully
//! simulated bot runs end to end without exchange credentials.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::exchange::{Account, MarketData, OrderExecutor};
use crate::types::{ClosedPnl, ExecutionOutcome, OrderRequest, Side, TradingMode};

/// Paper trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    pub initial_balance: f64,
    pub slippage_bps: f64,
    pub fee_bps: f64,
    /// Notional multiplier for futures orders
    pub futures_leverage: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            slippage_bps: 5.0,
            fee_bps: 10.0,
            futures_leverage: 9.0,
        }
    }
}

/// Simulated open position
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub mode: TradingMode,
    pub entry_price: f64,
    pub qty: f64,
    /// Balance locked by the position (excluding the entry fee)
    pub margin: f64,
    pub entry_fee: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl PaperPosition {
    fn exit_trigger(&self, price: f64) -> Option<&'static str> {
        match self.side {
            Side::Buy if price <= self.stop_loss => Some("STOP_LOSS"),
            Side::Buy if price >= self.take_profit => Some("TAKE_PROFIT"),
            Side::Sell if price >= self.stop_loss => Some("STOP_LOSS"),
            Side::Sell if price <= self.take_profit => Some("TAKE_PROFIT"),
            _ => None,
        }
    }

    fn gross_pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.qty,
            Side::Sell => (self.entry_price - exit_price) * self.qty,
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    balance: f64,
    positions: Vec<PaperPosition>,
}

/// Dry-run executor and virtual account
pub struct PaperExchange {
    config: PaperConfig,
    book: RwLock<PaperBook>,
    prices: Option<Arc<dyn MarketData>>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            book: RwLock::new(PaperBook {
                balance,
                positions: Vec::new(),
            }),
            prices: None,
        }
    }

    /// Enable stop-loss/take-profit settlement against live prices
    pub fn with_prices(mut self, prices: Arc<dyn MarketData>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn balance(&self) -> f64 {
        self.book
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .balance
    }

    pub fn open_positions(&self) -> Vec<PaperPosition> {
        self.book
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .positions
            .clone()
    }

    fn slip(&self, price: f64, side: Side, opening: bool) -> f64 {
        let slip = self.config.slippage_bps / 10_000.0;
        // buying pays up, selling receives less
        let buying = (side == Side::Buy) == opening;
        if buying {
            price * (1.0 + slip)
        } else {
            price * (1.0 - slip)
        }
    }

    fn fee(&self, notional: f64) -> f64 {
        notional * self.config.fee_bps / 10_000.0
    }

    /// Close every position whose bracket was crossed at `price`
    pub fn settle_at(&self, symbol: &str, price: f64) -> Vec<ClosedPnl> {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        let mut closed = Vec::new();
        let mut remaining = Vec::with_capacity(book.positions.len());

        for position in std::mem::take(&mut book.positions) {
            let trigger = if position.symbol == symbol {
                position.exit_trigger(price)
            } else {
                None
            };
            let Some(trigger) = trigger else {
                remaining.push(position);
                continue;
            };

            let exit_price = self.slip(price, position.side, false);
            let exit_fee = self.fee(exit_price * position.qty);
            let gross = position.gross_pnl(exit_price);
            let pnl = gross - position.entry_fee - exit_fee;
            book.balance += position.margin + gross - exit_fee;

            info!(
                id = %position.id,
                symbol = %position.symbol,
                side = %position.side,
                trigger = trigger,
                entry = position.entry_price,
                exit = exit_price,
                pnl = pnl,
                balance = book.balance,
                "[PAPER] Position closed"
            );
            closed.push(ClosedPnl {
                symbol: position.symbol.clone(),
                order_id: Some(position.id.clone()),
                pnl,
                closed_at: Utc::now(),
            });
        }

        book.positions = remaining;
        closed
    }
}

#[async_trait]
impl OrderExecutor for PaperExchange {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Option<ExecutionOutcome>> {
        if order.price <= 0.0 || order.amount_usdt <= 0.0 {
            warn!(symbol = %order.symbol, "[PAPER] Invalid order parameters");
            return Ok(None);
        }

        let leverage = match order.mode {
            TradingMode::Spot => 1.0,
            TradingMode::Futures => self.config.futures_leverage.max(1.0),
        };
        let fill_price = self.slip(order.price, order.side, true);
        let notional = order.amount_usdt * leverage;
        let qty = notional / fill_price;
        let fee = self.fee(notional);
        let cost = order.amount_usdt + fee;

        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        if cost > book.balance {
            warn!(
                symbol = %order.symbol,
                cost = cost,
                balance = book.balance,
                "[PAPER] Insufficient virtual balance"
            );
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        book.balance -= cost;
        book.positions.push(PaperPosition {
            id: id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            mode: order.mode,
            entry_price: fill_price,
            qty,
            margin: order.amount_usdt,
            entry_fee: fee,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
        });

        info!(
            id = %id,
            symbol = %order.symbol,
            side = %order.side,
            mode = %order.mode,
            fill = fill_price,
            qty = qty,
            fee = fee,
            balance = book.balance,
            "[PAPER] Order filled"
        );

        Ok(Some(ExecutionOutcome {
            order_id: id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            qty,
            mode: order.mode,
            simulated: true,
            fee,
        }))
    }
}

#[async_trait]
impl Account for PaperExchange {
    async fn get_balance(&self) -> Result<f64> {
        Ok(self.balance())
    }

    async fn closed_pnl(&self) -> Result<Vec<ClosedPnl>> {
        let Some(prices) = &self.prices else {
            return Ok(Vec::new());
        };

        let mut symbols: Vec<String> = self
            .open_positions()
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();

        let mut closed = Vec::new();
        for symbol in symbols {
            match prices.get_price(&symbol).await {
                Ok(price) => closed.extend(self.settle_at(&symbol, price)),
                Err(e) => warn!(symbol = %symbol, error = %e, "[PAPER] Price unavailable for settlement"),
            }
        }
        Ok(closed)
    }

    fn reports_closed_pnl(&self) -> bool {
        true
    }
}
