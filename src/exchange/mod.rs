//! Exchange-facing collaborators
//!
//! The decision core only sees these traits; transport, authentication and
//! order mechanics live behind them. Implementations apply their own bounded
//! retries (see [`retry`]) so failures reaching the core are final.

mod bybit;
pub mod retry;

pub use bybit::{BybitConfig, BybitMarketData};
pub use retry::{with_backoff, RetryPolicy};

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candle, ClosedPnl, ExecutionOutcome, OrderRequest};

/// Market data source
#[async_trait]
pub trait MarketData: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candles ordered oldest -> newest
    async fn get_candles(&self, symbol: &str) -> Result<Vec<Candle>>;

    async fn get_price(&self, symbol: &str) -> Result<f64>;
}

/// Account source (USDT-denominated)
#[async_trait]
pub trait Account: Send + Sync {
    async fn get_balance(&self) -> Result<f64>;

    /// Authoritative realized-pnl reports since the previous call.
    ///
    /// Accounts without fill reporting return nothing and the engine falls
    /// back to balance-delta inference.
    async fn closed_pnl(&self) -> Result<Vec<ClosedPnl>> {
        Ok(Vec::new())
    }

    /// Whether `closed_pnl` is authoritative for this account
    fn reports_closed_pnl(&self) -> bool {
        false
    }
}

/// All-or-nothing order placement
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the order was not placed
    async fn execute(&self, order: &OrderRequest) -> Result<Option<ExecutionOutcome>>;
}
