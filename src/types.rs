//! Core data types shared by the backtester, the searches and the job manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("timestamp ({0} ms) is out of range")]
    InvalidTimestamp(i64),
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (trusted sources, test fixtures)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        // NaN fails every comparison, so test the positive case
        let positive = |v: f64| v > 0.0;
        if !(positive(self.open) && positive(self.high) && positive(self.low) && positive(self.close))
        {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A simulated fill.
///
/// Buy fills carry zero profit; sell fills carry the realized net profit of
/// the position they close, fees included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub profit: f64,
}

/// Account balance after a realized trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Output of a signal strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_valid_candle() {
        let candle = Candle::new(ts(), 100.0, 105.0, 95.0, 102.0, 10.0);
        assert!(candle.is_ok());
    }

    #[test]
    fn test_high_below_low_rejected() {
        let err = Candle::new(ts(), 100.0, 90.0, 95.0, 92.0, 10.0).unwrap_err();
        assert!(matches!(
            err,
            CandleValidationError::HighLessThanLow { .. } | CandleValidationError::OpenOutOfRange { .. }
        ));
    }

    #[test]
    fn test_nan_price_rejected() {
        let candle = Candle::new_unchecked(ts(), f64::NAN, 105.0, 95.0, 100.0, 1.0);
        assert!(matches!(
            candle.validate(),
            Err(CandleValidationError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn test_close_out_of_range_rejected() {
        let err = Candle::new(ts(), 100.0, 105.0, 95.0, 110.0, 1.0).unwrap_err();
        assert!(matches!(err, CandleValidationError::CloseOutOfRange { .. }));
    }

    #[test]
    fn test_negative_volume_rejected() {
        let err = Candle::new(ts(), 100.0, 105.0, 95.0, 100.0, -1.0).unwrap_err();
        assert!(matches!(err, CandleValidationError::NegativeVolume(_)));
    }

    #[test]
    fn test_side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"sell\"");
    }
}
