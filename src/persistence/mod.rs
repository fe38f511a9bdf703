//! JSON Persistence Module
//!
//! Handles storage of the confidence store, trade journal, signal statistics
//! and risk snapshot. Every file is written atomically (temp file + rename)
//! so a crash mid-write leaves the previous version intact.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::types::TradeRecord;

const DEFAULT_BOT_PREFIX: &str = "main_bot";

/// Load/save contract for one persisted value.
///
/// `load` returns `Ok(None)` when nothing was stored yet and
/// `Err(BotError::Corrupt)` when the stored bytes cannot be decoded; owners
/// recover from both by reinitialising defaults.
pub trait StateStore<T>: Send + Sync {
    fn load(&self) -> Result<Option<T>>;
    fn save(&self, value: &T) -> Result<()>;
    /// Human-readable location for logs
    fn location(&self) -> String;
}

/// Pretty-printed JSON file
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> StateStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BotError::Persistence {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| BotError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn save(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        write_atomic(&self.path, json.as_bytes())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write `bytes` next to `path` and rename over it
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |source| BotError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// In-process store, used for tests and ephemeral bots
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> StateStore<T> for MemoryStore<T> {
    fn load(&self) -> Result<Option<T>> {
        match self.value.lock() {
            Ok(guard) => Ok(guard.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }

    fn save(&self, value: &T) -> Result<()> {
        match self.value.lock() {
            Ok(mut guard) => *guard = Some(value.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(value.clone()),
        }
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// File naming for one bot instance.
///
/// The default `main_bot` prefix keeps the bare file names; any other prefix
/// is prepended so several bots can share a data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
    bot_prefix: String,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>, bot_prefix: &str) -> Self {
        let bot_prefix = if bot_prefix.trim().is_empty() {
            DEFAULT_BOT_PREFIX.to_string()
        } else {
            bot_prefix.trim().to_string()
        };
        Self {
            data_dir: data_dir.into(),
            bot_prefix,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn bot_prefix(&self) -> &str {
        &self.bot_prefix
    }

    pub fn file(&self, name: &str) -> PathBuf {
        if self.bot_prefix == DEFAULT_BOT_PREFIX {
            self.data_dir.join(name)
        } else {
            self.data_dir.join(format!("{}_{}", self.bot_prefix, name))
        }
    }

    pub fn confidence_file(&self) -> PathBuf {
        self.file("ai_brain.json")
    }

    pub fn trades_file(&self) -> PathBuf {
        self.file("ai_memory.json")
    }

    pub fn signal_stats_file(&self) -> PathBuf {
        self.file("signal_stats.json")
    }

    pub fn risk_state_file(&self) -> PathBuf {
        self.file("risk_state.json")
    }

    pub fn daily_stats_file(&self) -> PathBuf {
        self.file("daily_stats.json")
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new("./data", DEFAULT_BOT_PREFIX)
    }
}

/// Trade history contract consumed by the decision core
pub trait TradeLog: Send + Sync {
    fn load_trades(&self) -> Result<Vec<TradeRecord>>;
    fn append_trade(&self, record: TradeRecord) -> Result<()>;
    /// Attach `pnl` to the newest trade still awaiting one and return it
    fn attach_pnl(&self, pnl: f64) -> Result<Option<TradeRecord>>;
    /// Same as `attach_pnl`, restricted to one symbol
    fn attach_pnl_for_symbol(&self, symbol: &str, pnl: f64) -> Result<Option<TradeRecord>>;
    /// Attach `pnl` to the trade opened by `order_id`, if it still awaits one
    fn attach_pnl_for_order(&self, order_id: &str, pnl: f64) -> Result<Option<TradeRecord>>;

    fn attach_pnl_to_last_eligible_trade(&self, pnl: f64) -> Result<bool> {
        Ok(self.attach_pnl(pnl)?.is_some())
    }
}

/// Append-only trade journal on top of a [`StateStore`]
pub struct TradeJournal {
    store: Box<dyn StateStore<Vec<TradeRecord>>>,
}

impl TradeJournal {
    pub fn new(store: Box<dyn StateStore<Vec<TradeRecord>>>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(JsonFileStore::new(path)))
    }

    pub fn trades_for(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .load_trades()?
            .into_iter()
            .filter(|t| t.symbol == symbol)
            .collect())
    }

    pub fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        Ok(self
            .load_trades()?
            .into_iter()
            .filter(|t| t.time >= since)
            .collect())
    }

    pub fn last_trade_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .load_trades()?
            .iter()
            .filter(|t| t.symbol == symbol)
            .map(|t| t.time)
            .max())
    }

    fn attach_where<F>(&self, pnl: f64, eligible: F) -> Result<Option<TradeRecord>>
    where
        F: Fn(&TradeRecord) -> bool,
    {
        let mut trades = self.load_trades()?;
        let Some(trade) = trades
            .iter_mut()
            .rev()
            .find(|t| t.awaits_pnl() && eligible(t))
        else {
            return Ok(None);
        };

        trade.pnl = Some(pnl);
        let updated = trade.clone();
        self.store.save(&trades)?;
        info!(
            symbol = %updated.symbol,
            side = %updated.side,
            pnl = pnl,
            "Realized pnl attached to trade"
        );
        Ok(Some(updated))
    }
}

impl TradeLog for TradeJournal {
    fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        match self.store.load() {
            Ok(Some(trades)) => Ok(trades),
            Ok(None) => Ok(Vec::new()),
            Err(BotError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Trade journal corrupt, reinitialising");
                self.store.save(&Vec::new())?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn append_trade(&self, record: TradeRecord) -> Result<()> {
        let mut trades = self.load_trades()?;
        trades.push(record);
        self.store.save(&trades)
    }

    fn attach_pnl(&self, pnl: f64) -> Result<Option<TradeRecord>> {
        self.attach_where(pnl, |_| true)
    }

    fn attach_pnl_for_symbol(&self, symbol: &str, pnl: f64) -> Result<Option<TradeRecord>> {
        self.attach_where(pnl, |t| t.symbol == symbol)
    }

    fn attach_pnl_for_order(&self, order_id: &str, pnl: f64) -> Result<Option<TradeRecord>> {
        self.attach_where(pnl, |t| t.order_id.as_deref() == Some(order_id))
    }
}
