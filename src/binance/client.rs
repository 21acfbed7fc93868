//! Binance public REST client for historical klines
//!
//! No API key is required for market data endpoints.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

use super::types::{BinanceKline, ExchangeInfo};

const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Binance limit per `/klines` request
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Pause between paginated requests (ms)
const RATE_LIMIT_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BINANCE_API_BASE)
    }

    /// Point the client at another host (testnet, proxy)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(BinanceClient {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch one page of klines
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<BinanceKline>> {
        let url = format!("{}/klines", self.base_url);

        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }
        let limit = limit
            .unwrap_or(MAX_KLINES_PER_REQUEST)
            .min(MAX_KLINES_PER_REQUEST);
        params.push(("limit", limit.to_string()));

        debug!(symbol, interval, limit, "Fetching klines");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("Failed to send request to Binance")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_data: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance response")?;

        Ok(raw_data
            .iter()
            .filter_map(|row| BinanceKline::from_raw(row))
            .collect())
    }

    /// Fetch every kline opening inside `[start, end]`, paginating as needed.
    ///
    /// Unlike a single page request, a failing page aborts the whole fetch:
    /// a window with a hole in it is not usable for a backtest.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BinanceKline>> {
        let end_ms = end.timestamp_millis();
        let mut current_start = start.timestamp_millis();
        let mut all_klines = Vec::new();

        info!(symbol, interval, %start, %end, "Fetching klines from Binance");

        while current_start <= end_ms {
            let klines = self
                .get_klines(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_ms),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await
                .with_context(|| format!("Failed to fetch {} {} klines", symbol, interval))?;

            let Some(last) = klines.last() else {
                break;
            };
            current_start = last.open_time + 1;
            let page_len = klines.len();
            all_klines.extend(klines);

            if page_len < MAX_KLINES_PER_REQUEST as usize {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(RATE_LIMIT_DELAY_MS)).await;
        }

        all_klines.sort_by_key(|k| k.open_time);
        all_klines.dedup_by_key(|k| k.open_time);

        info!(symbol, interval, count = all_klines.len(), "Fetched klines");
        Ok(all_klines)
    }

    /// Symbols currently trading on the exchange
    pub async fn trading_symbols(&self) -> Result<HashSet<String>> {
        let url = format!("{}/exchangeInfo", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to Binance")?;

        if !response.status().is_success() {
            anyhow::bail!("Binance API error {}", response.status());
        }

        let info: ExchangeInfo = response
            .json()
            .await
            .context("Failed to parse exchange info")?;

        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.is_trading())
            .map(|s| s.symbol)
            .collect())
    }
}
