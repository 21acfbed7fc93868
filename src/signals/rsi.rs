//! RSI mean reversion: buy oversold, sell overbought

use anyhow::Result;
use std::collections::HashSet;

use super::{closes, Params, SignalStrategy};
use crate::indicators::rsi;
use crate::{Candle, SignalAction};

#[derive(Debug, Clone)]
pub struct RsiStrategy {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl RsiStrategy {
    pub const PARAMETERS: &'static [&'static str] = &["period", "oversold", "overbought"];

    pub fn new(period: usize, oversold: f64, overbought: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            anyhow::bail!("RSI thresholds must lie in 0..=100");
        }
        if oversold >= overbought {
            anyhow::bail!(
                "oversold ({}) must be below overbought ({})",
                oversold,
                overbought
            );
        }
        Ok(RsiStrategy {
            period,
            oversold,
            overbought,
        })
    }

    pub(crate) fn from_params(params: &Params) -> Result<Self> {
        Self::new(
            params.period("period")?,
            params.float("oversold")?,
            params.float("overbought")?,
        )
    }
}

impl SignalStrategy for RsiStrategy {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn required_parameters(&self) -> HashSet<&'static str> {
        Self::PARAMETERS.iter().copied().collect()
    }

    fn generate_signal(&self, candles: &[Candle]) -> SignalAction {
        let Some(Some(value)) = rsi(&closes(candles), self.period).last().copied() else {
            return SignalAction::Hold;
        };

        if value < self.oversold {
            SignalAction::Buy
        } else if value > self.overbought {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::test_support::candles_from_closes;

    fn strategy() -> RsiStrategy {
        RsiStrategy::new(14, 30.0, 70.0).unwrap()
    }

    #[test]
    fn test_falling_market_is_oversold() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 3.0).collect();
        assert_eq!(
            strategy().generate_signal(&candles_from_closes(&closes)),
            SignalAction::Buy
        );
    }

    #[test]
    fn test_rising_market_is_overbought() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 3.0).collect();
        assert_eq!(
            strategy().generate_signal(&candles_from_closes(&closes)),
            SignalAction::Sell
        );
    }

    #[test]
    fn test_short_history_holds() {
        let closes = vec![100.0, 101.0, 99.0];
        assert_eq!(
            strategy().generate_signal(&candles_from_closes(&closes)),
            SignalAction::Hold
        );
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        assert!(RsiStrategy::new(14, 70.0, 30.0).is_err());
    }
}
