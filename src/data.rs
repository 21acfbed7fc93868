//! Market data providers
//!
//! The optimizer only needs two things from market data: an ordered candle
//! series for a symbol/timeframe/window, and the set of symbols that exist.
//! Candles come from CSV files on disk, from Binance, or from Binance with the
//! CSV directory acting as a cache.
//!
//! CSV layout: `{data_dir}/{SYMBOL}_{timeframe}.csv` with header
//! `datetime,open,high,low,close,volume`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binance::{self, BinanceClient};
use crate::config::{AppConfig, DataSource};
use crate::Candle;

/// Source of historical candles.
///
/// Implementations return candles in chronological order. Callers assume the
/// window is gap-free and do not check it.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn get_symbols(&self) -> Result<HashSet<String>>;
}

/// Build the provider selected in the application config
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn MarketDataProvider>> {
    let provider: Arc<dyn MarketDataProvider> = match config.data.source {
        DataSource::Csv => Arc::new(CsvDataProvider::new(&config.data.data_dir)),
        DataSource::Binance if config.data.cache => Arc::new(CachingDataProvider::new(
            BinanceDataProvider::new()?,
            &config.data.data_dir,
        )),
        DataSource::Binance => Arc::new(BinanceDataProvider::new()?),
    };
    info!(
        source = %config.data.source,
        data_dir = %config.data.data_dir,
        "Market data provider ready"
    );
    Ok(provider)
}

// =============================================================================
// CSV helpers
// =============================================================================

pub fn csv_filename(symbol: &str, timeframe: &str) -> String {
    format!("{}_{}.csv", symbol.to_uppercase(), timeframe)
}

/// Load OHLCV data from a CSV file, skipping rows that fail validation
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 1))
        };

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_date(dt_str)?;

        match Candle::new(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {:?}: {}",
                    row_idx + 2,
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    candles.sort_by_key(|c| c.datetime);
    Ok(candles)
}

/// Write candles to a CSV file, creating parent directories
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "datetime,open,high,low,close,volume")?;
    for candle in candles {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            candle.datetime.format("%Y-%m-%d %H:%M:%S"),
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume
        )?;
    }

    debug!("Saved {} rows to {}", candles.len(), path.display());
    Ok(())
}

/// Keep candles opening inside `[start, end]`
pub fn filter_candles_by_date(
    candles: Vec<Candle>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| {
            let after_start = start.map_or(true, |s| c.datetime >= s);
            let before_end = end.map_or(true, |e| c.datetime <= e);
            after_start && before_end
        })
        .collect()
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (start of day, UTC)
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let date_str = date_str.trim();

    if let Ok(dt) = date_str.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }

    if let Ok(nd) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        if let Some(ndt) = nd.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
        }
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

// =============================================================================
// CSV provider
// =============================================================================

pub struct CsvDataProvider {
    data_dir: PathBuf,
}

impl CsvDataProvider {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        CsvDataProvider {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.data_dir.join(csv_filename(symbol, timeframe))
    }
}

#[async_trait]
impl MarketDataProvider for CsvDataProvider {
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            anyhow::bail!("Data file not found: {}", path.display());
        }

        let candles = load_csv(&path)
            .with_context(|| format!("Failed to load data for {}", symbol))?;
        let total = candles.len();
        let candles = filter_candles_by_date(candles, Some(start), Some(end));

        info!(
            "Loaded {} candles for {} {} (filtered from {} total)",
            candles.len(),
            symbol,
            timeframe,
            total
        );
        Ok(candles)
    }

    async fn get_symbols(&self) -> Result<HashSet<String>> {
        let entries = std::fs::read_dir(&self.data_dir)
            .with_context(|| format!("Failed to list {}", self.data_dir.display()))?;

        let mut symbols = HashSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".csv") {
                if let Some((symbol, _timeframe)) = stem.rsplit_once('_') {
                    symbols.insert(symbol.to_string());
                }
            }
        }
        Ok(symbols)
    }
}

// =============================================================================
// Binance provider
// =============================================================================

pub struct BinanceDataProvider {
    client: BinanceClient,
}

impl BinanceDataProvider {
    pub fn new() -> Result<Self> {
        Ok(BinanceDataProvider {
            client: BinanceClient::new()?,
        })
    }

    pub fn with_client(client: BinanceClient) -> Self {
        BinanceDataProvider { client }
    }
}

#[async_trait]
impl MarketDataProvider for BinanceDataProvider {
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if !binance::is_valid_interval(timeframe) {
            anyhow::bail!("Unsupported Binance interval: {}", timeframe);
        }

        let klines = self
            .client
            .fetch_range(&symbol.to_uppercase(), timeframe, start, end)
            .await?;

        let mut candles = Vec::with_capacity(klines.len());
        let mut invalid_count = 0;
        for kline in klines {
            match Candle::try_from(kline) {
                Ok(candle) => candles.push(candle),
                Err(e) => {
                    invalid_count += 1;
                    warn!("Skipping invalid candle for {}: {}", symbol, e);
                }
            }
        }

        if invalid_count > 0 {
            warn!(
                "Skipped {} invalid candles out of {} for {}",
                invalid_count,
                invalid_count + candles.len(),
                symbol
            );
        }

        Ok(candles)
    }

    async fn get_symbols(&self) -> Result<HashSet<String>> {
        self.client.trading_symbols().await
    }
}

// =============================================================================
// Caching provider
// =============================================================================

/// Serves candles from the CSV directory when the file covers the requested
/// window, otherwise fetches from `inner` and merges the fetched window into
/// the file.
pub struct CachingDataProvider<P> {
    inner: P,
    cache: CsvDataProvider,
}

impl<P: MarketDataProvider> CachingDataProvider<P> {
    pub fn new(inner: P, data_dir: impl AsRef<Path>) -> Self {
        CachingDataProvider {
            inner,
            cache: CsvDataProvider::new(data_dir),
        }
    }

    fn cached(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Vec<Candle>> {
        let path = self.cache.path_for(symbol, timeframe);
        if !path.exists() {
            return None;
        }

        let candles = match load_csv(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {:#}", path.display(), e);
                return None;
            }
        };

        let first = candles.first()?.datetime;
        let last = candles.last()?.datetime;
        // Only a file spanning the whole window counts as a hit
        if first <= start && last >= end {
            Some(filter_candles_by_date(candles, Some(start), Some(end)))
        } else {
            None
        }
    }

    fn existing(&self, path: &Path) -> Vec<Candle> {
        if !path.exists() {
            return Vec::new();
        }
        load_csv(path).unwrap_or_else(|e| {
            warn!("Replacing unreadable cache file {}: {:#}", path.display(), e);
            Vec::new()
        })
    }
}

/// Union of two candle series by timestamp, `fresh` winning on overlap
fn merge_candles(cached: Vec<Candle>, fresh: &[Candle]) -> Vec<Candle> {
    let mut by_time: BTreeMap<DateTime<Utc>, Candle> =
        cached.into_iter().map(|c| (c.datetime, c)).collect();
    for candle in fresh {
        by_time.insert(candle.datetime, candle.clone());
    }
    by_time.into_values().collect()
}

#[async_trait]
impl<P: MarketDataProvider> MarketDataProvider for CachingDataProvider<P> {
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if let Some(candles) = self.cached(symbol, timeframe, start, end) {
            debug!(symbol, timeframe, "Serving candles from cache");
            return Ok(candles);
        }

        let candles = self
            .inner
            .get_historical_data(symbol, timeframe, start, end)
            .await?;

        if !candles.is_empty() {
            let path = self.cache.path_for(symbol, timeframe);
            let merged = merge_candles(self.existing(&path), &candles);
            if let Err(e) = save_csv(&path, &merged) {
                warn!("Failed to cache candles to {}: {:#}", path.display(), e);
            }
        }

        Ok(candles)
    }

    async fn get_symbols(&self) -> Result<HashSet<String>> {
        self.inner.get_symbols().await
    }
}
