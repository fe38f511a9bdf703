//! Balance-delta pnl inference
//!
//! Used only for accounts that cannot report realized pnl. A change in
//! balance larger than the threshold is treated as the pnl of the newest
//! unsettled trade.

use tracing::debug;

#[derive(Debug, Clone)]
pub struct BalanceReconciler {
    threshold: f64,
    last_balance: Option<f64>,
}

impl BalanceReconciler {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_balance: None,
        }
    }

    /// Record a balance observation and return the delta worth settling.
    ///
    /// The first observation only sets the baseline.
    pub fn observe(&mut self, balance: f64) -> Option<f64> {
        let previous = self.last_balance.replace(balance)?;
        let delta = balance - previous;
        if delta.abs() >= self.threshold {
            debug!(previous, balance, delta, "Balance delta detected");
            Some(delta)
        } else {
            None
        }
    }

    /// Forget the baseline; the next observation only sets it again
    pub fn rebaseline(&mut self) {
        self.last_balance = None;
    }

    /// Replace the baseline with a balance read after our own order, so
    /// the order's cost is not settled while later pnl still is
    pub fn rebaseline_to(&mut self, balance: f64) {
        self.last_balance = Some(balance);
    }

    pub fn last_balance(&self) -> Option<f64> {
        self.last_balance
    }
}

impl Default for BalanceReconciler {
    fn default() -> Self {
        Self::new(0.001)
    }
}
