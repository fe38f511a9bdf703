//! Bybit V5 public REST client for candles and last price

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::{with_backoff, RetryPolicy};
use super::MarketData;
use crate::types::Candle;

/// Public endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    pub base_url: String,
    /// `spot` or `linear`
    pub category: String,
    /// Kline interval (`1`, `5`, `15`, `60`, ...)
    pub interval: String,
    pub limit: u32,
    pub timeout_ms: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            category: "spot".to_string(),
            interval: "15".to_string(),
            limit: 200,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    #[serde(default)]
    list: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

/// Convert newest-first kline rows into oldest-first candles.
///
/// Rows are `[startTime, open, high, low, close, volume, turnover]`;
/// malformed rows are dropped.
fn parse_klines(rows: &[Vec<String>]) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| {
            if row.len() < 7 {
                return None;
            }
            Some(Candle {
                open_time: row[0].parse().ok()?,
                open: row[1].parse().ok()?,
                high: row[2].parse().ok()?,
                low: row[3].parse().ok()?,
                close: row[4].parse().ok()?,
                volume: row[5].parse().ok()?,
                turnover: row[6].parse().ok()?,
            })
        })
        .collect();
    candles.reverse();
    candles
}

fn unwrap_result<T>(response: BybitResponse<T>, what: &str) -> Result<T> {
    if response.ret_code != 0 {
        bail!(
            "Bybit {} returned retCode {}: {}",
            what,
            response.ret_code,
            response.ret_msg
        );
    }
    response
        .result
        .with_context(|| format!("Bybit {} response has no result", what))
}

/// Market data over Bybit public endpoints
pub struct BybitMarketData {
    client: reqwest::Client,
    config: BybitConfig,
    retry: RetryPolicy,
}

impl BybitMarketData {
    pub fn new(config: BybitConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    async fn fetch_klines(&self, symbol: &str) -> Result<Vec<Candle>> {
        let url = format!("{}/v5/market/kline", self.config.base_url);
        let limit = self.config.limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("category", self.config.category.as_str()),
                ("symbol", symbol),
                ("interval", self.config.interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch klines from Bybit")?;

        if !response.status().is_success() {
            bail!("Bybit kline endpoint returned {}", response.status());
        }

        let body: BybitResponse<KlineResult> = response
            .json()
            .await
            .context("Failed to parse Bybit kline response")?;
        let result = unwrap_result(body, "kline")?;
        Ok(parse_klines(&result.list))
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/v5/market/tickers", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("category", self.config.category.as_str()),
                ("symbol", symbol),
            ])
            .send()
            .await
            .context("Failed to fetch ticker from Bybit")?;

        if !response.status().is_success() {
            bail!("Bybit ticker endpoint returned {}", response.status());
        }

        let body: BybitResponse<TickerResult> = response
            .json()
            .await
            .context("Failed to parse Bybit ticker response")?;
        let result = unwrap_result(body, "ticker")?;
        let ticker = result
            .list
            .first()
            .with_context(|| format!("No ticker returned for {}", symbol))?;
        ticker
            .last_price
            .parse::<f64>()
            .with_context(|| format!("Invalid lastPrice '{}'", ticker.last_price))
    }
}

#[async_trait]
impl MarketData for BybitMarketData {
    fn name(&self) -> &'static str {
        "Bybit"
    }

    async fn get_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
        let candles = with_backoff(&self.retry, "bybit.get_candles", || {
            self.fetch_klines(symbol)
        })
        .await?;
        tracing::debug!(symbol = %symbol, count = candles.len(), "Candles fetched");
        Ok(candles)
    }

    async fn get_price(&self, symbol: &str) -> Result<f64> {
        with_backoff(&self.retry, "bybit.get_price", || self.fetch_price(symbol)).await
    }
}
