//! MACD crossover: trade when the MACD line crosses its signal line

use anyhow::Result;
use std::collections::HashSet;

use super::{closes, last_two, Params, SignalStrategy};
use crate::indicators::macd;
use crate::{Candle, SignalAction};

#[derive(Debug, Clone)]
pub struct MacdStrategy {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl MacdStrategy {
    pub const PARAMETERS: &'static [&'static str] = &["fast", "slow", "signal"];

    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast >= slow {
            anyhow::bail!("MACD fast period ({}) must be below slow ({})", fast, slow);
        }
        Ok(MacdStrategy { fast, slow, signal })
    }

    pub(crate) fn from_params(params: &Params) -> Result<Self> {
        Self::new(
            params.period("fast")?,
            params.period("slow")?,
            params.period("signal")?,
        )
    }
}

impl SignalStrategy for MacdStrategy {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn required_parameters(&self) -> HashSet<&'static str> {
        Self::PARAMETERS.iter().copied().collect()
    }

    fn generate_signal(&self, candles: &[Candle]) -> SignalAction {
        let (_, _, histogram) = macd(&closes(candles), self.fast, self.slow, self.signal);

        match last_two(&histogram) {
            Some((prev, cur)) if prev <= 0.0 && cur > 0.0 => SignalAction::Buy,
            Some((prev, cur)) if prev >= 0.0 && cur < 0.0 => SignalAction::Sell,
            _ => SignalAction::Hold,
        }
    }
}
