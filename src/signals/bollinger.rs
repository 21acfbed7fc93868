//! Bollinger band reversion: buy below the lower band, sell above the upper

use anyhow::Result;
use std::collections::HashSet;

use super::{closes, Params, SignalStrategy};
use crate::indicators::bollinger_bands;
use crate::{Candle, SignalAction};

#[derive(Debug, Clone)]
pub struct BollingerStrategy {
    pub period: usize,
    pub num_std: f64,
}

impl BollingerStrategy {
    pub const PARAMETERS: &'static [&'static str] = &["period", "num_std"];

    pub fn new(period: usize, num_std: f64) -> Result<Self> {
        if num_std <= 0.0 {
            anyhow::bail!("num_std must be positive, got {}", num_std);
        }
        Ok(BollingerStrategy { period, num_std })
    }

    pub(crate) fn from_params(params: &Params) -> Result<Self> {
        Self::new(params.period("period")?, params.float("num_std")?)
    }
}

impl SignalStrategy for BollingerStrategy {
    fn name(&self) -> &'static str {
        "bollinger"
    }

    fn required_parameters(&self) -> HashSet<&'static str> {
        Self::PARAMETERS.iter().copied().collect()
    }

    fn generate_signal(&self, candles: &[Candle]) -> SignalAction {
        let Some(last) = candles.last() else {
            return SignalAction::Hold;
        };
        let (upper, _, lower) = bollinger_bands(&closes(candles), self.period, self.num_std);

        match (upper.last().copied().flatten(), lower.last().copied().flatten()) {
            (_, Some(lo)) if last.close < lo => SignalAction::Buy,
            (Some(hi), _) if last.close > hi => SignalAction::Sell,
            _ => SignalAction::Hold,
        }
    }
}
