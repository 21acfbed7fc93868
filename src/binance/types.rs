//! Binance REST payloads used for market data

use chrono::DateTime;
use serde::Deserialize;

use crate::{Candle, CandleValidationError};

/// One kline row.
///
/// The API returns an array: `[open_time, open, high, low, close, volume,
/// close_time, ...]` with prices encoded as strings.
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl BinanceKline {
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 7 {
            return None;
        }

        Some(BinanceKline {
            open_time: raw[0].as_i64()?,
            open: raw[1].as_str()?.parse().ok()?,
            high: raw[2].as_str()?.parse().ok()?,
            low: raw[3].as_str()?.parse().ok()?,
            close: raw[4].as_str()?.parse().ok()?,
            volume: raw[5].as_str()?.parse().ok()?,
            close_time: raw[6].as_i64()?,
        })
    }
}

impl TryFrom<BinanceKline> for Candle {
    type Error = CandleValidationError;

    fn try_from(k: BinanceKline) -> Result<Self, Self::Error> {
        let datetime = DateTime::from_timestamp_millis(k.open_time)
            .ok_or(CandleValidationError::InvalidTimestamp(k.open_time))?;
        Candle::new(datetime, k.open, k.high, k.low, k.close, k.volume)
    }
}

/// Subset of `/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
}

impl SymbolInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

/// Valid Binance intervals
pub const BINANCE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

pub fn is_valid_interval(interval: &str) -> bool {
    BINANCE_INTERVALS.contains(&interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kline_from_raw() {
        let raw = vec![
            json!(1_700_000_000_000i64),
            json!("100.0"),
            json!("110.0"),
            json!("95.0"),
            json!("105.0"),
            json!("12.5"),
            json!(1_700_003_599_999i64),
        ];
        let kline = BinanceKline::from_raw(&raw).unwrap();
        assert_eq!(kline.open_time, 1_700_000_000_000);
        assert_eq!(kline.close, 105.0);

        let candle = Candle::try_from(kline).unwrap();
        assert_eq!(candle.high, 110.0);
        assert_eq!(candle.datetime.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_out_of_range_open_time_rejected() {
        let kline = BinanceKline {
            open_time: i64::MAX,
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 1.0,
            close_time: i64::MAX,
        };
        assert!(matches!(
            Candle::try_from(kline),
            Err(CandleValidationError::InvalidTimestamp(i64::MAX))
        ));
    }

    #[test]
    fn test_short_row_rejected() {
        let raw = vec![json!(1), json!("1.0")];
        assert!(BinanceKline::from_raw(&raw).is_none());
    }

    #[test]
    fn test_intervals() {
        assert!(is_valid_interval("4h"));
        assert!(!is_valid_interval("7m"));
    }
}
